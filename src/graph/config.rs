/// Switches that change how a graph is compiled and executed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GraphConfig {
    /// Drop passes whose results never reach an output.
    pub cull_unreferenced_passes: bool,
    /// Let consecutive raster passes drawing into the same attachments share one render pass.
    pub merge_compatible_render_passes: bool,
    /// Keep every pooled allocation until the graph finishes instead of releasing it after
    /// its last use.
    pub extend_resource_lifetimes: bool,
    /// Execute each pass as soon as it's added, for debugging.
    pub force_immediate_execution: bool,
    /// Run `ASYNC_COMPUTE` passes on their own pipe, otherwise they go to graphics.
    pub enable_async_compute: bool,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            cull_unreferenced_passes: true,
            merge_compatible_render_passes: true,
            extend_resource_lifetimes: false,
            force_immediate_execution: false,
            enable_async_compute: true,
        }
    }
}

impl GraphConfig {
    /// Defaults overridden by `RDG_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let flag = |key: &str, default: bool| match lookup(key).as_deref().map(str::trim) {
            Some("1") | Some("true") | Some("on") => true,
            Some("0") | Some("false") | Some("off") => false,
            _ => default,
        };
        let defaults = Self::default();
        Self {
            cull_unreferenced_passes: flag("RDG_CULL_PASSES", defaults.cull_unreferenced_passes),
            merge_compatible_render_passes: flag(
                "RDG_MERGE_RENDER_PASSES",
                defaults.merge_compatible_render_passes,
            ),
            extend_resource_lifetimes: flag(
                "RDG_EXTEND_RESOURCE_LIFETIMES",
                defaults.extend_resource_lifetimes,
            ),
            force_immediate_execution: flag(
                "RDG_IMMEDIATE_MODE",
                defaults.force_immediate_execution,
            ),
            enable_async_compute: flag("RDG_ASYNC_COMPUTE", defaults.enable_async_compute),
        }
    }

    pub fn immediate() -> Self {
        Self {
            force_immediate_execution: true,
            ..Self::default()
        }
    }
}

#[test]
fn test_config_lookup() {
    let config = GraphConfig::from_lookup(|key| match key {
        "RDG_CULL_PASSES" => Some("0".to_owned()),
        "RDG_IMMEDIATE_MODE" => Some(" true ".to_owned()),
        "RDG_ASYNC_COMPUTE" => Some("maybe".to_owned()),
        _ => None,
    });
    assert!(!config.cull_unreferenced_passes);
    assert!(config.force_immediate_execution);
    assert!(config.enable_async_compute);
    assert!(config.merge_compatible_render_passes);
}
