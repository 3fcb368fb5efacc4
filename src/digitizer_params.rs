use crate::{AcquisitionConfig, StorageBudget};
use log::info;

/// Log the acquisition parameters and the storage budget of a run.
pub fn log_all(config: &AcquisitionConfig, budget: &StorageBudget, stamp: &str) {
    let mut param_log = String::new();

    let params: [(&str, String); 10] = [
        ("Sampling rate", format!("{:.2} MHz", config.sampling_rate() / 1e6)),
        ("Decimation", config.decimation.to_string()),
        ("Trigger source", config.trigger_source.to_string()),
        ("Trigger level", format!("{} V", config.trigger_level)),
        ("Trigger delay", config.trigger_delay.to_string()),
        ("Samples per event", config.samples.to_string()),
        ("Samples delay", config.samples_delay.to_string()),
        ("Channels", format!("{:?}", config.channels)),
        (
            "Trigger timeout",
            config
                .trigger_timeout
                .map_or_else(|| "none".to_string(), |t| format!("{:?}", t)),
        ),
        ("Session stamp", stamp.to_string()),
    ];
    for (name, value) in params {
        param_log.push_str(&format!("{}: {}\n", name, value));
    }

    param_log.push_str(&format!(
        "Free space: {:.2} MB, {:.2} MB usable above the {:.0} MB margin\n",
        budget.free_space_mb, budget.available_mb, budget.safety_margin_mb
    ));
    param_log.push_str(&format!(
        "Events: {} requested (~{:.2} KB), {} fit, {} to capture (~{:.2} KB)",
        budget.requested_events,
        budget.requested_total_kb,
        budget.max_events,
        budget.effective_events,
        budget.estimated_total_kb
    ));

    info!("Acquisition parameters:\n{}", param_log);
}
