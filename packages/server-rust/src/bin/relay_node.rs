//! Citizen-registration demo built on the relay runtime.
//!
//! `SERVICE_ID` selects the role this process plays:
//!
//! | role                 | what it does                                              |
//! |----------------------|-----------------------------------------------------------|
//! | `register-api`       | async `POST /api/citizen`, publishes `citizen registered` |
//! | `mail-consumer`      | validates registered citizens, publishes confirmations    |
//! | `delivery-consumer`  | batches confirmed citizens for card delivery              |
//! | `batch-scheduler`    | hourly; starts the delivery task shortly after midnight   |
//! | `batch-ptask-api`    | `POST/GET /ptask/delivery`                                |
//! | `batch-ptask-worker` | one delivery batch run per worker message                 |
//! | `external-api`       | slow mock of the third-party validation/delivery API      |

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use axum::http::StatusCode;
use chrono::Timelike;
use clap::Parser;
use relay_core::generate_id;
use relay_server::context::Context;
use relay_server::telemetry::{init_tracing, install_metrics_exporter};
use relay_server::traits::{Backends, ProducerExt};
use relay_server::{from_addresses, ReadTimeout, ServiceConfig, ServiceError, ServiceRuntime};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

const CITIZEN_REGISTERED_TOPIC: &str = "when-citizen-has-registered";
const CITIZEN_CONFIRMED_TOPIC: &str = "when-citizen-has-confirmed";
const CITIZEN_VALIDATION_API: &str = "http://external-api:8080/3rd-party/validate";
const BATCH_DELIVER_API: &str = "http://batch-ptask-api:8080/ptask/delivery";
const DELIVERY_PTASK_PATH: &str = "/ptask/delivery";

#[derive(Debug, Serialize, Deserialize)]
struct Citizen {
    citizen_id: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServiceConfig::parse();
    init_tracing(config.log_format)?;
    if let Some(addr) = config.metrics_addr {
        install_metrics_exporter(addr)?;
    }

    let backends = from_addresses(&config.cache_server, &config.mq_servers)
        .context("selecting cache and broker backends")?;
    let runtime = ServiceRuntime::new(config.clone(), Arc::clone(&backends));
    runtime.register_liveness_probe_endpoint("/healthz");
    runtime.register_readiness_probe_endpoint("/readyz");

    info!(service_id = %config.service_id, "registering services");
    match config.service_id.as_str() {
        "register-api" => register_api(&runtime),
        "mail-consumer" => mail_consumer(&runtime),
        "delivery-consumer" => delivery_consumer(&runtime, ReadTimeout::Infinite),
        "batch-scheduler" => batch_scheduler(&runtime)?,
        "batch-ptask-api" => runtime.ptask_endpoint(DELIVERY_PTASK_PATH),
        "batch-ptask-worker" => batch_ptask_worker(&runtime, backends, config.clone()),
        "external-api" => external_api(&runtime),
        other => warn!(service_id = other, "unknown SERVICE_ID; serving probes only"),
    }

    runtime.start().await
}

fn register_api(runtime: &ServiceRuntime) {
    runtime.async_post("/api/citizen", |ctx: Arc<dyn Context>| async move {
        ctx.log(&format!("POST: /api/citizen {}", ctx.read_input()));

        let citizen = Citizen {
            citizen_id: generate_id(),
        };
        ctx.producer()?
            .send_json(CITIZEN_REGISTERED_TOPIC, "", &citizen)
            .await?;

        ctx.respond(
            StatusCode::OK,
            json!({ "status": "success", "citizen_id": citizen.citizen_id }),
        )
        .await
    });
}

fn mail_consumer(runtime: &ServiceRuntime) {
    runtime.consume(
        CITIZEN_REGISTERED_TOPIC,
        "mail-consumer",
        ReadTimeout::Infinite,
        |ctx: Arc<dyn Context>| async move {
            let citizen: Citizen = serde_json::from_str(&ctx.read_input())?;

            let body = ctx
                .requester("", Duration::from_secs(5))
                .post(CITIZEN_VALIDATION_API, &[("citizen_id", citizen.citizen_id.as_str())])
                .await?;
            let validation: Value = serde_json::from_str(&body)?;

            if validation["status"] != "ok" {
                ctx.log(&format!("Mail rejection has sent to {}", citizen.citizen_id));
                return Ok(());
            }
            ctx.log(&format!("Mail confirmation has sent to {}", citizen.citizen_id));

            ctx.producer()?
                .send_json(CITIZEN_CONFIRMED_TOPIC, "", &citizen)
                .await?;
            Ok(())
        },
    );
}

fn delivery_consumer(runtime: &ServiceRuntime, timeout: ReadTimeout) {
    runtime.consume_batch(
        CITIZEN_CONFIRMED_TOPIC,
        "deliver-consumer",
        timeout,
        5,
        Duration::from_secs(5),
        |ctx: Arc<dyn Context>| async move {
            for input in ctx.read_inputs() {
                ctx.log(&format!("Deliver to {input}"));
            }
            Ok(())
        },
    );
}

fn batch_scheduler(runtime: &ServiceRuntime) -> Result<(), ServiceError> {
    runtime.schedule(Duration::from_secs(60 * 60), |ctx: Arc<dyn Context>| async move {
        if ctx.now().hour() != 0 {
            return Ok(());
        }
        let path = format!("{BATCH_DELIVER_API}?task_id=batch_deliver&worker_count=5");
        let body = ctx
            .requester("", Duration::from_secs(30))
            .post(&path, &[])
            .await?;
        ctx.log(&body);
        Ok(())
    })?;
    Ok(())
}

/// Each worker message runs a nested runtime that drains confirmed
/// citizens in batches and exits once the topic stays quiet for five
/// minutes.
fn batch_ptask_worker(runtime: &ServiceRuntime, backends: Arc<dyn Backends>, config: ServiceConfig) {
    runtime.ptask_worker_node(DELIVERY_PTASK_PATH, move |ctx: Arc<dyn Context>| {
        let backends = Arc::clone(&backends);
        let config = config.clone();
        async move {
            let delivery = ServiceRuntime::new(config, backends);
            delivery_consumer(&delivery, ReadTimeout::After(Duration::from_secs(5 * 60)));
            delivery.start().await?;

            ctx.respond(StatusCode::OK, json!({ "status": "success" }))
                .await
        }
    });
}

fn external_api(runtime: &ServiceRuntime) {
    for path in ["/3rd-party/validate", "/3rd-party/delivery"] {
        runtime.post(path, |ctx: Arc<dyn Context>| async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            ctx.respond(StatusCode::OK, json!({ "status": "ok" })).await
        });
    }
}
