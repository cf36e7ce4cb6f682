use record_pipeline::{ExecCtx, PipelineConfig, Record, RequestKind};
use serde_json::json;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = PipelineConfig::from_json_str(
        r#"{
            "default_chain": {"mode": "named", "name": "validation_only"},
            "batch_concurrency": 3
        }"#,
    )?;
    let runner = config.batch_runner(ExecCtx::builder().run_id("demo-batch").build());

    let users = [
        json!({"name": "Ada", "email": "ada@example.com"}),
        json!({"name": "Bo"}),
        json!({"name": "Cy", "email": "not-an-email"}),
        json!({"name": "Dee", "email": "dee@example.org"}),
    ];
    let records = users
        .into_iter()
        .map(|user| {
            Record::from_value(
                RequestKind::Validation,
                json!({
                    "payload": user,
                    "required_fields": ["name", "email"],
                    "validation_rules": {"email": {"type": "email"}, "name": {"min_length": 3}}
                }),
            )
        })
        .collect();

    let batch = runner
        .run_config_with_progress(records, &config.default_chain, |p| {
            println!("[{}/{}] {}", p.current, p.total, p.status);
        })
        .await?;

    for item in &batch.items {
        match item.result() {
            Some(result) => println!(
                "#{} success={} errors={:?}",
                item.index,
                result.success,
                result.errors.iter().map(|e| e.text.as_str()).collect::<Vec<_>>()
            ),
            None => println!("#{} failed outside the chain", item.index),
        }
    }
    println!(
        "total={} successful={} failed={} errors={} warnings={}",
        batch.total, batch.successful, batch.failed, batch.summary.total_errors, batch.summary.total_warnings
    );

    Ok(())
}
