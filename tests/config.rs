use wavepool::config::{ConfigError, DataflowType, ProcessConfig, SocketMode};
use wavepool::queue::OverflowPolicy;

const SAMPLE: &str = r#"{
    "RTADP1": {
        "logs_path": "/tmp/logs",
        "logging": "debug",
        "processing_type": "analysis",
        "dataflow_type": "binary",
        "datasocket_type": "pushpull",
        "data_lp_socket": "tcp://127.0.0.1:5555",
        "data_hp_socket": "tcp://127.0.0.1:5556",
        "command_socket": "tcp://127.0.0.1:5557",
        "monitoring_socket": "tcp://127.0.0.1:5558",
        "ctrl_socket": "tcp://127.0.0.1:1235",
        "run_id": 12,
        "queue_limit": 4096,
        "queue_policy": "dropoldest",
        "workers": [
            {
                "name": "WaveAnalysis",
                "worker_name": "wave",
                "num_workers": 4,
                "result_socket_type": "pushpull",
                "result_dataflow_type": "binary",
                "result_lp_socket": "tcp://127.0.0.1:5559",
                "result_hp_socket": "none"
            }
        ]
    },
    "OTHER": {
        "processing_type": "echo",
        "dataflow_type": "string",
        "datasocket_type": "pubsub",
        "data_lp_socket": "tcp://127.0.0.1:6555",
        "data_hp_socket": "tcp://127.0.0.1:6556",
        "command_socket": "tcp://127.0.0.1:6557",
        "monitoring_socket": "tcp://127.0.0.1:6558",
        "workers": [
            {
                "name": "S1",
                "worker_name": "s",
                "result_socket_type": "pubsub",
                "result_dataflow_type": "string",
                "result_lp_socket": "none",
                "result_hp_socket": "none"
            }
        ]
    }
}"#;

#[test]
fn loads_the_named_process_entry() {
    let cfg = ProcessConfig::from_str(SAMPLE, "RTADP1").unwrap();
    assert_eq!(cfg.name, "RTADP1");
    assert_eq!(cfg.dataflow_type, DataflowType::Binary);
    assert_eq!(cfg.datasocket_type, SocketMode::PushPull);
    assert_eq!(cfg.run_id, 12);
    assert_eq!(cfg.ctrl_socket.as_deref(), Some("tcp://127.0.0.1:1235"));
    assert_eq!(cfg.workers.len(), 1);
    assert_eq!(cfg.workers[0].num_workers, 4);
    assert_eq!(cfg.overflow_policy(), OverflowPolicy::DropOldest(4096));
}

#[test]
fn optional_fields_take_defaults() {
    let cfg = ProcessConfig::from_str(SAMPLE, "OTHER").unwrap();
    assert_eq!(cfg.run_id, 0);
    assert!(cfg.ctrl_socket.is_none());
    assert_eq!(cfg.workers[0].num_workers, 1);
    assert_eq!(cfg.overflow_policy(), OverflowPolicy::Unbounded);
}

#[test]
fn unknown_process_name_is_reported() {
    assert!(matches!(
        ProcessConfig::from_str(SAMPLE, "MISSING"),
        Err(ConfigError::MissingProcess(name)) if name == "MISSING"
    ));
}

#[test]
fn zero_workers_is_invalid() {
    let broken = SAMPLE.replace("\"num_workers\": 4", "\"num_workers\": 0");
    assert!(matches!(
        ProcessConfig::from_str(&broken, "RTADP1"),
        Err(ConfigError::Invalid(_))
    ));
}

#[test]
fn bounded_policy_requires_a_limit() {
    let broken = SAMPLE.replace("\"queue_limit\": 4096,", "");
    assert!(matches!(
        ProcessConfig::from_str(&broken, "RTADP1"),
        Err(ConfigError::Invalid(_))
    ));
}

#[test]
fn malformed_json_is_reported() {
    assert!(matches!(
        ProcessConfig::from_str("{ not json", "X"),
        Err(ConfigError::Json(_))
    ));
}
