use std::io;

use super::{record::GraphBuilder, state::Pipe, GraphPass};
use crate::util::format_utils::{Fun, IterDisplay};

impl<'a> GraphBuilder<'a> {
    /// Writes the pass graph in graphviz format, one cluster per pipe.
    ///
    /// Soft edges are gray, culled passes dashed and fork and join fences bold. Before
    /// execution every pass is drawn as retained.
    pub fn write_dot_representation(&self, writer: &mut dyn io::Write) -> io::Result<()> {
        let compiled = self.compiled.as_ref();
        let retained = |p: usize| compiled.map_or(true, |c| c.is_retained(GraphPass::new(p)));

        let clusters = Fun::new(|w| {
            // subgraph cluster_Graphics { label="Graphics"; p0[label="prologue"]; }
            for (i, pipe) in [Pipe::Graphics, Pipe::AsyncCompute].into_iter().enumerate() {
                let members = self
                    .passes
                    .iter()
                    .enumerate()
                    .filter(|(_, pass)| pass.pipe == pipe);
                let nodes = IterDisplay::new(members, "", |(p, pass), w| {
                    let style = if retained(p) { "solid" } else { "dashed" };
                    write!(
                        w,
                        r#"p{p}[label="{}"; style={style}];"#,
                        pass.display(p).set_prefix("#")
                    )
                });
                writeln!(
                    w,
                    r#"subgraph cluster_{i} {{ label="{pipe}"; style=dashed; {nodes} }}"#
                )?;
            }

            // p0 -> p1[color=darkgray];
            for (p, pass) in self.passes.iter().enumerate() {
                for dep in &pass.dependencies {
                    write!(w, "p{} -> p{}", dep.index(), p)?;
                    if !dep.is_hard() {
                        write!(w, "[color=darkgray]")?;
                    }
                    write!(w, ";")?;
                }
            }
            writeln!(w)?;

            if let Some(compiled) = compiled {
                for fence in compiled.fences() {
                    write!(
                        w,
                        r#"p{} -> p{}[style=bold; label="fence {}"];"#,
                        fence.signal.1.index(),
                        fence.wait.1.index(),
                        fence.id.index()
                    )?;
                }
                writeln!(w)?;
            }
            Ok(())
        });

        writeln!(
            writer,
            r#"digraph G {{
fontname="Helvetica,Arial,sans-serif";
node[fontname="Helvetica,Arial,sans-serif"; fontsize=9; shape=rect];
edge[fontname="Helvetica,Arial,sans-serif"];
newrank = true;
rankdir = TB;
{clusters}}}"#
        )
    }
}
