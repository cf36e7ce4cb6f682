use record_pipeline::chain::ChainConfig;
use record_pipeline::events::FnEventHandler;
use record_pipeline::{ChainBuilder, Event, ExecCtx, Orchestrator, Record, RequestKind, StageRegistry};
use serde_json::json;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Unknown names are skipped at build time.
    let config: ChainConfig = serde_json::from_str(
        r#"{"mode": "dynamic", "stages": ["validation", "spellcheck", "export"]}"#,
    )?;
    let builder = ChainBuilder::with_registry(StageRegistry::with_builtins());
    let chain = builder.build_config(&config)?;
    println!("chain '{}': {:?}", chain.name(), chain.stage_names());

    let ctx = ExecCtx::builder()
        .run_id("demo-dynamic")
        .event_handler(Arc::new(FnEventHandler(|event: Event| match event {
            Event::StageStart { stage, .. } => println!("  -> {}", stage),
            Event::StageSkipped { stage, .. } => println!("  .. {} (skipped)", stage),
            Event::RunEnd { success, duration_ms, .. } => {
                println!("  done: success={} in {} ms", success, duration_ms)
            }
            _ => {}
        })))
        .build();
    let orchestrator = Orchestrator::with_ctx(ctx);

    let record = Record::from_value(
        RequestKind::Export,
        json!({
            "payload": {"user": {"name": "Linus", "langs": ["c", "rust"]}, "active": true},
            "export_config": {"format": "xml", "flatten": true, "root_element": "user"}
        }),
    );
    let result = orchestrator.run(record, &chain).await;

    if let Some(export) = &result.derived_payloads.export_result {
        println!("{}", export["content"].as_str().unwrap_or_default());
    }

    Ok(())
}
