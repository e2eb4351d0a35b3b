use std::io;

use super::{descriptors::ResourceDesc, record::GraphBuilder, GraphPass, GraphResource};
use crate::util::format_utils::Fun;

impl<'a> GraphBuilder<'a> {
    /// Lists every resource with its descriptor, refcount and the retained passes using it.
    pub fn dump_resources(&self, writer: &mut dyn io::Write) -> io::Result<()> {
        for (i, resource) in self.resources.iter().enumerate() {
            let handle = GraphResource::new(i);
            let users = self
                .passes
                .iter()
                .enumerate()
                .filter(|(p, pass)| {
                    !pass.synthetic
                        && pass.demand(handle).is_some()
                        && self
                            .compiled
                            .as_ref()
                            .map_or(true, |c| c.is_retained(GraphPass::new(*p)))
                })
                .map(|(p, _)| GraphPass::new(p));
            let (mut first, mut last) = (None, None);
            for pass in users {
                first.get_or_insert(pass);
                last = Some(pass);
            }

            let desc = Fun::new(|f| match &resource.desc {
                ResourceDesc::Texture(desc) => write!(
                    f,
                    "texture {:?} {}x{}x{} mips={} layers={} usage={:?}",
                    desc.format,
                    desc.extent[0],
                    desc.extent[1],
                    desc.extent[2],
                    desc.mip_count,
                    desc.array_size,
                    desc.usage
                ),
                ResourceDesc::Buffer(desc) => write!(
                    f,
                    "buffer {}x{}B usage={:?}",
                    desc.element_count, desc.element_size, desc.usage
                ),
            });
            let lifetime = Fun::new(|f| match (first, last) {
                (Some(first), Some(last)) => write!(
                    f,
                    "{} .. {}",
                    self.pass_name(first),
                    self.pass_name(last)
                ),
                _ => write!(f, "unused"),
            });
            let status = Fun::new(|f| {
                if resource.is_external() {
                    write!(f, " external")?;
                }
                if resource.extracted {
                    write!(f, " extracted")?;
                }
                Ok(())
            });

            writeln!(
                writer,
                "{}: {desc} refcount={} passes={lifetime}{status}",
                resource.display(i).set_prefix("resource #"),
                resource.refcount,
            )?;
        }
        Ok(())
    }
}
