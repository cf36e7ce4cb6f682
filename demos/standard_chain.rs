use record_pipeline::{ChainBuilder, ExecCtx, Orchestrator, Record, RequestKind};
use serde_json::json;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Every stage is linked, but only the one matching the record's kind runs.
    let chain = ChainBuilder::new().build_standard()?;
    let orchestrator = Orchestrator::with_ctx(ExecCtx::builder().run_id("demo-standard").build());

    let records = vec![
        Record::from_value(
            RequestKind::Validation,
            json!({
                "payload": {"name": "Jo", "age": 17, "email": "jo@example"},
                "required_fields": ["name", "email", "phone"],
                "validation_rules": {
                    "name": {"min_length": 3},
                    "age": {"type": "number", "min_value": 18},
                    "email": {"type": "email"}
                }
            }),
        ),
        Record::from_value(
            RequestKind::Transformation,
            json!({
                "payload": {"name": "ada lovelace", "price": "19.5", "phone": "555.123.4567", "ratio": 3},
                "transformations": {
                    "name": "title_case",
                    "price": "multiply_1.2",
                    "phone": "normalize_phone",
                    "ratio": "divide_0"
                }
            }),
        ),
        Record::from_value(
            RequestKind::Enrichment,
            json!({
                "payload": {
                    "first_name": "Grace", "last_name": "Hopper", "age": 42,
                    "email": "grace@navy.mil", "country": "US", "job_title": "Senior Engineer"
                }
            }),
        ),
        Record::from_value(
            RequestKind::Export,
            json!({
                "payload": [{"id": 1, "name": "a"}, {"id": 2, "name": "b"}],
                "export_config": {"format": "csv"}
            }),
        ),
        Record::from_value(
            RequestKind::Notification,
            json!({
                "payload": {"id": 7},
                "notification_config": {"type": "success", "channels": ["email", "slack", "pager"]}
            }),
        ),
    ];

    for record in records {
        let result = orchestrator
            .run_with_progress(record, &chain, |p| {
                println!("  [{:>3}%] {}", p.percent, p.status);
            })
            .await;

        println!(
            "{} -> success={} errors={} warnings={} ({} ms)",
            result.request_kind,
            result.success,
            result.errors.len(),
            result.warnings.len(),
            result.duration.as_millis()
        );
        for entry in &result.log {
            println!("    {}: {}", entry.stage_name, entry.message);
        }
        for err in &result.errors {
            println!("    error   {}: {}", err.stage_name, err.text);
        }
        for warning in &result.warnings {
            println!("    warning {}: {}", warning.stage_name, warning.text);
        }
    }

    Ok(())
}
