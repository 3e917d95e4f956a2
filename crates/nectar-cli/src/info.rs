//! Info command implementation.

use std::path::PathBuf;

use nectar_core::{Binding, EvaluatorConfig, ExecutionSession};

use crate::open_registry;

/// Print what a function declares about itself.
pub fn execute(
    module: &str,
    function: &str,
    search_dirs: &[PathBuf],
    json: bool,
) -> anyhow::Result<()> {
    let config = EvaluatorConfig::from_env()?;
    let registry = open_registry(search_dirs, config.retry);

    let binding = Binding::build(&registry, module, function)?;
    let path = binding.module_path().map(|p| p.display().to_string());
    let session = ExecutionSession::new(binding)?;
    let info = session.info().clone();
    session.close()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&info)?);
    } else {
        println!("function:    {}", function);
        if let Some(path) = path {
            println!("module:      {}", path);
        }
        println!("inputs:      {}", info.input_dimension);
        println!("outputs:     {}", info.output_dimension);
        println!(
            "description: {}",
            info.description.as_deref().unwrap_or("(none)")
        );
    }

    registry.teardown()?;
    Ok(())
}
