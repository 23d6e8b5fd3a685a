//! Labdesk workflow CLI.
//!
//! Thin client over the orchestrator HTTP API: create workflows, watch
//! their progress, and resolve approval gates from the terminal.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

const DEFAULT_SERVER_URL: &str = "http://localhost:8088";

#[derive(Parser)]
#[command(name = "labdeskctl")]
#[command(version, about = "Labdesk workflow command line tool", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Orchestrator server URL (or LABDESK_SERVER_URL)
    #[arg(long, global = true)]
    server_url: Option<String>,

    /// Emit raw JSON instead of tables
    #[arg(short, long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a workflow and start its pipeline
    Create {
        /// Project the workflow belongs to
        #[arg(long)]
        project_id: Uuid,

        /// Workflow name
        #[arg(long)]
        name: Option<String>,

        /// Who is requesting the run
        #[arg(long, default_value = "labdeskctl")]
        requested_by: String,

        /// Auto-approve gates instead of waiting for a human
        #[arg(long)]
        autonomous: bool,

        /// Cluster type to run experiments on
        #[arg(long)]
        cluster_type: Option<String>,

        /// Cap on the number of experiments
        #[arg(long)]
        max_experiments: Option<i32>,
    },
    /// List workflows
    List {
        #[arg(long)]
        project_id: Option<Uuid>,

        /// Filter by status (pending, running, waiting_human, ...)
        #[arg(long)]
        status: Option<String>,

        #[arg(long, default_value_t = 50)]
        limit: i64,
    },
    /// Show one workflow
    Status {
        workflow_id: Uuid,
    },
    /// Show a workflow's event log, newest first
    Events {
        workflow_id: Uuid,

        #[arg(long, default_value_t = 50)]
        limit: i64,
    },
    /// Show a workflow's approval gates
    Gates {
        workflow_id: Uuid,
    },
    /// Approve a pending gate
    Approve {
        workflow_id: Uuid,
        gate_id: Uuid,

        /// Selected answer; defaults to the gate's first option
        #[arg(long)]
        option: Option<String>,

        #[arg(long)]
        comment: Option<String>,

        #[arg(long, default_value = "labdeskctl")]
        resolved_by: String,
    },
    /// Reject a pending gate (fails the workflow)
    Reject {
        workflow_id: Uuid,
        gate_id: Uuid,

        #[arg(long)]
        option: Option<String>,

        #[arg(long)]
        comment: Option<String>,

        #[arg(long, default_value = "labdeskctl")]
        resolved_by: String,
    },
    /// Send a gate back with requested changes (rewinds the pipeline)
    RequestChanges {
        workflow_id: Uuid,
        gate_id: Uuid,

        /// Comment describing the requested changes
        #[arg(long)]
        comment: String,

        #[arg(long, default_value = "labdeskctl")]
        resolved_by: String,
    },
    /// Request cancellation of a workflow
    Cancel {
        workflow_id: Uuid,
    },
    /// Resume a stalled workflow
    Resume {
        workflow_id: Uuid,
    },
}

#[derive(Debug, Deserialize, Serialize)]
struct WorkflowInstance {
    id: Uuid,
    project_id: Uuid,
    name: String,
    status: String,
    current_step: String,
    error_message: Option<String>,
    cancel_requested: bool,
    created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    rest: serde_json::Value,
}

#[derive(Debug, Deserialize, Serialize)]
struct WorkflowEvent {
    id: Uuid,
    event_type: String,
    level: String,
    message: String,
    created_at: DateTime<Utc>,
    #[serde(flatten)]
    rest: serde_json::Value,
}

#[derive(Debug, Deserialize, Serialize)]
struct HumanGate {
    id: Uuid,
    step: String,
    title: String,
    question: String,
    options: serde_json::Value,
    status: String,
    selected_option: Option<String>,
    comment: Option<String>,
    #[serde(flatten)]
    rest: serde_json::Value,
}

struct Api {
    client: Client,
    base_url: String,
    json: bool,
}

impl Api {
    fn new(server_url: Option<String>, json: bool) -> Self {
        let base_url = server_url
            .or_else(|| std::env::var("LABDESK_SERVER_URL").ok())
            .unwrap_or_else(|| DEFAULT_SERVER_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        Self {
            client: Client::new(),
            base_url,
            json,
        }
    }

    async fn get<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<T> {
        let response = self
            .client
            .get(format!("{}{path}", self.base_url))
            .send()
            .await
            .with_context(|| format!("GET {path}"))?;
        Self::parse(response).await
    }

    async fn post<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<T> {
        let mut request = self.client.post(format!("{}{path}", self.base_url));
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await.with_context(|| format!("POST {path}"))?;
        Self::parse(response).await
    }

    async fn parse<T: for<'de> Deserialize<'de>>(response: reqwest::Response) -> Result<T> {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            bail!("Server returned {status}: {body}");
        }
        serde_json::from_str(&body).with_context(|| format!("Unexpected response body: {body}"))
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_instance(instance: &WorkflowInstance) {
    println!("{:<38} {}", "id:", instance.id);
    println!("{:<38} {}", "name:", instance.name);
    println!("{:<38} {}", "project:", instance.project_id);
    println!("{:<38} {}", "status:", instance.status);
    println!("{:<38} {}", "current step:", instance.current_step);
    if instance.cancel_requested {
        println!("{:<38} yes", "cancel requested:");
    }
    if let Some(error) = &instance.error_message {
        println!("{:<38} {}", "error:", error);
    }
    if let Some(done) = instance.completed_at {
        println!("{:<38} {}", "completed:", done.to_rfc3339());
    }
}

fn print_instances(instances: &[WorkflowInstance]) {
    println!(
        "{:<38} {:<24} {:<14} {:<16} NAME",
        "ID", "CREATED", "STATUS", "STEP"
    );
    for instance in instances {
        println!(
            "{:<38} {:<24} {:<14} {:<16} {}",
            instance.id,
            instance.created_at.format("%Y-%m-%d %H:%M:%S"),
            instance.status,
            instance.current_step,
            instance.name
        );
    }
}

fn print_events(events: &[WorkflowEvent]) {
    println!("{:<24} {:<8} {:<28} MESSAGE", "TIME", "LEVEL", "TYPE");
    for event in events {
        println!(
            "{:<24} {:<8} {:<28} {}",
            event.created_at.format("%Y-%m-%d %H:%M:%S"),
            event.level,
            event.event_type,
            event.message
        );
    }
}

fn print_gates(gates: &[HumanGate]) {
    for gate in gates {
        println!("gate {} [{}] ({})", gate.id, gate.step, gate.status);
        println!("  {}", gate.title);
        println!("  {}", gate.question);
        println!("  options: {}", gate.options);
        if let Some(option) = &gate.selected_option {
            println!("  decision: {option}");
        }
        if let Some(comment) = &gate.comment {
            println!("  comment: {comment}");
        }
    }
}

async fn resolve_gate(
    api: &Api,
    workflow_id: Uuid,
    gate_id: Uuid,
    status: &str,
    option: Option<String>,
    comment: Option<String>,
    resolved_by: String,
) -> Result<()> {
    // Approvals need an option; fall back to the gate's first one.
    let option = match (status, option) {
        ("approved", None) => {
            let gates: Vec<HumanGate> = api.get(&format!("/api/workflows/{workflow_id}/gates")).await?;
            let gate = gates
                .iter()
                .find(|g| g.id == gate_id)
                .with_context(|| format!("Gate {gate_id} not found on workflow {workflow_id}"))?;
            let first = gate
                .options
                .as_array()
                .and_then(|o| o.first())
                .and_then(|v| v.as_str())
                .with_context(|| format!("Gate {gate_id} has no options"))?;
            Some(first.to_string())
        }
        (_, option) => option,
    };

    let body = json!({
        "status": status,
        "selected_option": option,
        "comment": comment,
        "resolved_by": resolved_by,
    });
    let gate: HumanGate = api
        .post(
            &format!("/api/workflows/{workflow_id}/gates/{gate_id}/resolve"),
            Some(&body),
        )
        .await?;

    if api.json {
        print_json(&gate)?;
    } else {
        println!(
            "Gate {} resolved as {} ({})",
            gate.id,
            gate.status,
            gate.selected_option.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let api = Api::new(cli.server_url.clone(), cli.json);

    match cli.command {
        Commands::Create {
            project_id,
            name,
            requested_by,
            autonomous,
            cluster_type,
            max_experiments,
        } => {
            let body = json!({
                "project_id": project_id,
                "name": name,
                "requested_by": requested_by,
                "decision_mode": if autonomous { "autonomous" } else { "human_in_the_loop" },
                "cluster_type": cluster_type,
                "max_experiments": max_experiments,
            });
            let instance: WorkflowInstance = api.post("/api/workflows", Some(&body)).await?;
            if api.json {
                print_json(&instance)?;
            } else {
                print_instance(&instance);
            }
        }
        Commands::List {
            project_id,
            status,
            limit,
        } => {
            let mut path = format!("/api/workflows?limit={limit}");
            if let Some(project_id) = project_id {
                path.push_str(&format!("&project_id={project_id}"));
            }
            if let Some(status) = status {
                path.push_str(&format!("&status={status}"));
            }
            let instances: Vec<WorkflowInstance> = api.get(&path).await?;
            if api.json {
                print_json(&instances)?;
            } else {
                print_instances(&instances);
            }
        }
        Commands::Status { workflow_id } => {
            let instance: WorkflowInstance =
                api.get(&format!("/api/workflows/{workflow_id}")).await?;
            if api.json {
                print_json(&instance)?;
            } else {
                print_instance(&instance);
            }
        }
        Commands::Events { workflow_id, limit } => {
            let events: Vec<WorkflowEvent> = api
                .get(&format!("/api/workflows/{workflow_id}/events?limit={limit}"))
                .await?;
            if api.json {
                print_json(&events)?;
            } else {
                print_events(&events);
            }
        }
        Commands::Gates { workflow_id } => {
            let gates: Vec<HumanGate> =
                api.get(&format!("/api/workflows/{workflow_id}/gates")).await?;
            if api.json {
                print_json(&gates)?;
            } else {
                print_gates(&gates);
            }
        }
        Commands::Approve {
            workflow_id,
            gate_id,
            option,
            comment,
            resolved_by,
        } => {
            resolve_gate(&api, workflow_id, gate_id, "approved", option, comment, resolved_by)
                .await?;
        }
        Commands::Reject {
            workflow_id,
            gate_id,
            option,
            comment,
            resolved_by,
        } => {
            resolve_gate(&api, workflow_id, gate_id, "rejected", option, comment, resolved_by)
                .await?;
        }
        Commands::RequestChanges {
            workflow_id,
            gate_id,
            comment,
            resolved_by,
        } => {
            resolve_gate(
                &api,
                workflow_id,
                gate_id,
                "changes_requested",
                None,
                Some(comment),
                resolved_by,
            )
            .await?;
        }
        Commands::Cancel { workflow_id } => {
            let instance: WorkflowInstance = api
                .post(&format!("/api/workflows/{workflow_id}/cancel"), None)
                .await?;
            if api.json {
                print_json(&instance)?;
            } else {
                print_instance(&instance);
            }
        }
        Commands::Resume { workflow_id } => {
            let instance: WorkflowInstance = api
                .post(&format!("/api/workflows/{workflow_id}/resume"), None)
                .await?;
            if api.json {
                print_json(&instance)?;
            } else {
                print_instance(&instance);
            }
        }
    }

    Ok(())
}
