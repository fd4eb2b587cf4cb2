use std::env;

use anyhow::{bail, Context, Result};
use diesel::prelude::*;
use tracing_subscriber::EnvFilter;

use compliance_docs::audit::audit_objects;
use compliance_docs::{config::AppConfig, db, models::Document, s3, schema::documents};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let mut args = env::args().skip(1);
    match args.next().as_deref() {
        Some("verify-objects") => {
            let problems = verify_objects(args.next()).await?;
            if problems > 0 {
                std::process::exit(2);
            }
        }
        Some(cmd) => {
            eprintln!("Unknown command: {cmd}\nUsage: maintenance verify-objects [tenant_id]");
            std::process::exit(1);
        }
        None => {
            eprintln!("Usage: maintenance verify-objects [tenant_id]");
            std::process::exit(1);
        }
    }

    Ok(())
}

/// Reports document rows whose object is gone or could not be checked.
async fn verify_objects(tenant_id: Option<String>) -> Result<usize> {
    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "maintenance",
        database_url = %config.redacted_database_url(),
        pool_size = config.database_max_pool_size,
        tenant_id = tenant_id.as_deref().unwrap_or("*"),
        "loaded backend configuration"
    );
    let storage = s3::build_storage(&config).await;
    if storage.bucket().is_none() {
        bail!("object storage is not configured; set S3_BUCKET, AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY");
    }

    let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
    let rows: Vec<Document> = {
        let mut conn = pool.get().context("failed to get database connection")?;
        let mut query = documents::table.into_boxed();
        if let Some(tenant_id) = &tenant_id {
            query = query.filter(documents::tenant_id.eq(tenant_id.clone()));
        }
        query
            .order(documents::uploaded_at.asc())
            .load(&mut conn)
            .context("failed to load document records")?
    };

    if rows.is_empty() {
        println!("No documents found.");
        return Ok(0);
    }

    println!("Checking {} documents…", rows.len());

    let audit = audit_objects(storage.as_ref(), rows).await;
    for document in &audit.missing {
        println!(
            "missing object: document {} (tenant {}) key {}",
            document.id, document.tenant_id, document.storage_key
        );
    }
    for document in &audit.foreign_bucket {
        println!(
            "unverifiable: document {} (tenant {}) is stored in bucket {}",
            document.id, document.tenant_id, document.storage_bucket
        );
    }
    for (document, err) in &audit.failed {
        eprintln!(
            "Failed to check object {} for document {}: {err}",
            document.storage_key, document.id
        );
    }

    println!(
        "{} of {} documents checked: {} missing, {} in another bucket, {} failed.",
        audit.problem_count(),
        audit.checked,
        audit.missing.len(),
        audit.foreign_bucket.len(),
        audit.failed.len()
    );
    Ok(audit.problem_count())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
