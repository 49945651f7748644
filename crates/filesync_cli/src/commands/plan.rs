//! Plan command implementation.

use super::{config, connect, controller};
use crate::Target;
use filesync_engine::Plan;

/// Prints the plan a pass would execute, without changing anything.
pub fn run(target: &Target, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let source = connect(target)?;
    let key = source.key_for(&target.manifest)?;
    let reconciler = controller(source, config(target, 30))?;
    let plan = reconciler.plan(&key)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&plan)?);
        }
        _ => print_text_output(&key, &plan),
    }

    Ok(())
}

fn print_text_output(key: &str, plan: &Plan) {
    println!("Plan for {key}");
    if plan.is_empty() {
        println!("  Nothing to do");
        return;
    }
    for name in &plan.to_delete {
        println!("  delete   {name}");
    }
    for name in &plan.to_purge {
        println!("  delete   {name} (non UTF-8 name)");
    }
    for (name, location) in &plan.to_download {
        println!("  download {name} <- {location}");
    }
}
