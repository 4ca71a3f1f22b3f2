/// Tracing subscriber setup.
pub mod logging;
/// TOML settings with environment overrides and hot reload.
pub mod toml_config;
