use colored::Colorize;
use stratus_cloud::{ApplyResult, ResourceConfig, ResourceSet};
use stratus_cloudstack::Naming;
use stratus_cloudstack::provider::VM_RESOURCE;

/// Short run id from the current time, e.g. `6530f1a2`
pub fn fresh_run_uri() -> String {
    format!("{:x}", chrono::Utc::now().timestamp())
}

/// Desired machines `naming.vm(0)..naming.vm(count - 1)`, all with `config`
pub fn machines(naming: &Naming, count: usize, config: serde_json::Value) -> ResourceSet {
    let mut desired = ResourceSet::new();
    for i in 0..count {
        desired.add(ResourceConfig::new(
            VM_RESOURCE,
            naming.vm(i),
            "cloudstack",
            config.clone(),
        ));
    }
    desired
}

pub fn print_result(result: &ApplyResult) {
    for success in &result.succeeded {
        println!("  {} {}", "✓".green(), success.message);
    }
    for failure in &result.failed {
        println!(
            "  {} {}: {}",
            "✗".red(),
            failure.action_id,
            failure.error.as_deref().unwrap_or("unknown error")
        );
    }
    println!(
        "{}",
        format!(
            "{} succeeded, {} failed in {:.1}s",
            result.succeeded.len(),
            result.failed.len(),
            result.duration_ms as f64 / 1000.0
        )
        .dimmed()
    );
}
