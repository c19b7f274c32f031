#![no_main]

use libfuzzer_sys::fuzz_target;

use infrastructure::config::AgentConfig;

// Arbitrary YAML through serde_yaml_ng and AgentConfig::validate().
// Must never panic. Accepted configs must yield a usable offload policy.
fuzz_target!(|data: &[u8]| {
    let Ok(yaml) = std::str::from_utf8(data) else {
        return;
    };
    if yaml.len() > 64 * 1024 {
        return;
    }
    if let Ok(config) = AgentConfig::from_yaml(yaml) {
        assert!(config.offload.event_channel_capacity > 0);
        assert_ne!(config.agent.metrics_port, 0);
        let _ = config.offload.policy();
        let _ = config.offload.poll_interval();
    }
});
