/*!
The supervisor process. Loads one process record from the configuration
file, builds the transform pool named by `processing_type`, and runs the
command loop until a shutdown command or signal arrives.
*/

use log::{error, info, LevelFilter};
use std::env;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use wavepool::config::ProcessConfig;
use wavepool::sink::{BatchWriter, RecordSchema};
use wavepool::supervisor::Supervisor;
use wavepool::transform::{EchoTransform, PulseAnalyzer, Transform, TransformFactory};

fn main() -> ExitCode {
    let mut args = env::args().skip(1);
    let (config_path, name) = match (args.next(), args.next()) {
        (Some(path), Some(name)) => (PathBuf::from(path), name),
        _ => {
            eprintln!("usage: wavepool <config.json> <process-name>");
            return ExitCode::from(2);
        }
    };

    let cfg = match ProcessConfig::from_file(&config_path, &name) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("wavepool: {}: {e}", config_path.display());
            return ExitCode::FAILURE;
        }
    };

    init_logging(&cfg);

    let factory = match build_factory(&cfg) {
        Ok(factory) => factory,
        Err(e) => {
            error!("wavepool: {e}");
            return ExitCode::FAILURE;
        }
    };

    let mut supervisor = match Supervisor::new(cfg, factory) {
        Ok(s) => s,
        Err(e) => {
            error!("wavepool: startup failed: {e}");
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = supervisor.register_signal_handlers() {
        error!("wavepool: {e}");
        return ExitCode::FAILURE;
    }

    supervisor.start();
    info!("wavepool: {name} exited");
    ExitCode::SUCCESS
}

fn init_logging(cfg: &ProcessConfig) {
    let level = match cfg.logging.as_deref() {
        Some("trace") => LevelFilter::Trace,
        Some("debug") => LevelFilter::Debug,
        Some("warning") | Some("warn") => LevelFilter::Warn,
        Some("error") => LevelFilter::Error,
        _ => LevelFilter::Info,
    };
    let mut builder = env_logger::Builder::from_default_env();
    builder.filter_level(level);
    if let Some(dir) = &cfg.logs_path {
        let path = Path::new(dir).join(format!("Supervisor-{}.log", cfg.name));
        match File::create(&path) {
            Ok(file) => {
                builder.target(env_logger::Target::Pipe(Box::new(file)));
            }
            Err(e) => eprintln!("wavepool: log file {} unavailable: {e}", path.display()),
        }
    }
    let _ = builder.try_init();
}

/// Map `processing_type` to a transform factory.
fn build_factory(cfg: &ProcessConfig) -> Result<TransformFactory, String> {
    match cfg.processing_type.as_str() {
        "echo" => Ok(Arc::new(|| Box::new(EchoTransform) as Box<dyn Transform>)),
        "analysis" => {
            let writer = match (&cfg.sink_model, &cfg.sink_output) {
                (Some(model), Some(output)) => {
                    let schema = RecordSchema::from_xml_file(Path::new(model))
                        .map_err(|e| format!("sink model {model}: {e}"))?;
                    let rows = cfg.sink_batch_rows.unwrap_or(10_000);
                    let writer = BatchWriter::new(schema, Path::new(output), rows)
                        .map_err(|e| format!("sink output {output}: {e}"))?;
                    Some(Arc::new(Mutex::new(writer)))
                }
                _ => None,
            };
            Ok(Arc::new(move || {
                Box::new(PulseAnalyzer::new(writer.clone())) as Box<dyn Transform>
            }))
        }
        other => Err(format!(
            "unknown processing_type `{other}` (expected `echo` or `analysis`)"
        )),
    }
}
