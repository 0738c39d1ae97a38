use anyhow::Result;
use clap::{Parser, Subcommand};
use common::{JobDescriptor, JobId, JobPriority, JobStatus, JobSubmissionProtocol, TaskReport};
use std::{env, time::Duration};

use crate::rpc::JobClient;

/// Igual que en el worker:
/// - En Docker: MASTER_URL=http://master:8080
/// - Local: default http://localhost:8080
fn master_base_url() -> String {
    env::var("MASTER_URL").unwrap_or_else(|_| "http://localhost:8080".to_string())
}

fn default_user() -> String {
    env::var("USER").unwrap_or_else(|_| "anonimo".to_string())
}

#[derive(Parser)]
#[command(name = "client")]
#[command(about = "CLI para enviar y seguir jobs en el coordinador")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reserva un id y envía un job
    Submit {
        #[arg(value_name = "NOMBRE")]
        name: String,
        /// Archivo, directorio o patrón glob (repetible)
        #[arg(long = "input", value_name = "RUTA")]
        inputs: Vec<String>,
        #[arg(long, default_value_t = 1)]
        reduces: u32,
        /// Por defecto $USER
        #[arg(long)]
        user: Option<String>,
        /// Tamaño de split en bytes (por defecto el del coordinador)
        #[arg(long)]
        split_size: Option<u64>,
        #[arg(long, value_enum, default_value_t = Priority::Normal)]
        priority: Priority,
    },
    /// Estado de un job
    Status {
        #[arg(value_name = "JOB_ID")]
        id: String,
    },
    Profile {
        #[arg(value_name = "JOB_ID")]
        id: String,
    },
    Counters {
        #[arg(value_name = "JOB_ID")]
        id: String,
    },
    Kill {
        #[arg(value_name = "JOB_ID")]
        id: String,
    },
    /// Mata un intento; con --fail cuenta como fallido
    KillTask {
        #[arg(value_name = "ATTEMPT_ID")]
        attempt: String,
        #[arg(long)]
        fail: bool,
    },
    /// Jobs sin terminar (o todos con --all)
    List {
        #[arg(long)]
        all: bool,
    },
    Cluster,
    Events {
        #[arg(value_name = "JOB_ID")]
        id: String,
        #[arg(long, default_value_t = 0)]
        from: u32,
        #[arg(long, default_value_t = 100)]
        max: u32,
    },
    /// Reportes de las tareas map (o reduce con --reduce)
    Tasks {
        #[arg(value_name = "JOB_ID")]
        id: String,
        #[arg(long)]
        reduce: bool,
    },
    Diagnostics {
        #[arg(value_name = "JOB_ID")]
        id: String,
        #[arg(value_name = "TASK_ID")]
        task: String,
        #[arg(value_name = "ATTEMPT_ID")]
        attempt: String,
    },
    /// Filesystem por defecto del cluster
    Fs,
    /// Sigue los eventos de un job hasta que termine
    Wait {
        #[arg(value_name = "JOB_ID")]
        id: String,
        /// Segundos entre consultas
        #[arg(long, default_value_t = 2)]
        interval: u64,
    },
    Trackers,
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum Priority {
    VeryHigh,
    High,
    Normal,
    Low,
    VeryLow,
}

impl From<Priority> for JobPriority {
    fn from(p: Priority) -> Self {
        match p {
            Priority::VeryHigh => JobPriority::VeryHigh,
            Priority::High => JobPriority::High,
            Priority::Normal => JobPriority::Normal,
            Priority::Low => JobPriority::Low,
            Priority::VeryLow => JobPriority::VeryLow,
        }
    }
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let client = JobClient::connect(&master_base_url()).await?;

    match cli.command {
        Commands::Submit {
            name,
            inputs,
            reduces,
            user,
            split_size,
            priority,
        } => {
            let job_id = client.get_new_job_id().await?;
            let descriptor = JobDescriptor {
                name,
                user: user.unwrap_or_else(default_user),
                input_paths: inputs,
                num_reduces: reduces,
                priority: priority.into(),
                split_size,
            };
            let status = client.submit_job(&job_id, descriptor).await?;
            println!("Job enviado:");
            print_status(&status);
        }
        Commands::Status { id } => match client.get_job_status(&id).await? {
            Some(status) => print_status(&status),
            None => println!("No se encontró el job con id {id}"),
        },
        Commands::Profile { id } => match client.get_job_profile(&id).await? {
            Some(p) => {
                println!("Job {}:", p.job_id);
                println!("  nombre: {}", p.name);
                println!("  usuario: {}", p.user);
                println!("  inputs: {}", p.input_paths.join(", "));
                println!("  reduces: {}", p.num_reduces);
                println!("  enviado: {}", p.submitted_at);
            }
            None => println!("No se encontró el job con id {id}"),
        },
        Commands::Counters { id } => match client.get_job_counters(&id).await? {
            Some(counters) => {
                for (group, values) in counters.groups() {
                    println!("{group}");
                    for (name, value) in values {
                        println!("  {name:<28} {value}");
                    }
                }
            }
            None => println!("No se encontró el job con id {id}"),
        },
        Commands::Kill { id } => {
            client.kill_job(&id).await?;
            println!("Pedido de kill enviado para {id}");
        }
        Commands::KillTask { attempt, fail } => {
            if client.kill_task(&attempt, fail).await? {
                println!("Intento {attempt} {}", if fail { "marcado como fallido" } else { "matado" });
            } else {
                println!("No se encontró el intento {attempt}");
            }
        }
        Commands::List { all } => {
            let jobs = if all {
                client.get_all_jobs().await?
            } else {
                client.jobs_to_complete().await?
            };
            if jobs.is_empty() {
                println!("No hay jobs");
            }
            for s in &jobs {
                println!(
                    "{}  {:?}  map {:>3.0}%  reduce {:>3.0}%  {}",
                    s.job_id,
                    s.state,
                    s.map_progress * 100.0,
                    s.reduce_progress * 100.0,
                    s.user
                );
            }
        }
        Commands::Cluster => {
            let cs = client.get_cluster_status().await?;
            println!("Cluster ({:?}):", cs.state);
            println!("  trackers: {} vivos, {} muertos", cs.task_trackers, cs.dead_trackers);
            println!("  maps: {}/{}", cs.map_tasks, cs.max_map_tasks);
            println!("  reduces: {}/{}", cs.reduce_tasks, cs.max_reduce_tasks);
        }
        Commands::Events { id, from, max } => {
            for e in client.get_task_completion_events(&id, from, max).await? {
                println!(
                    "#{} {} {:?} en {} ({} ms)",
                    e.event_id, e.attempt_id, e.status, e.tracker_host, e.run_time_ms
                );
            }
        }
        Commands::Tasks { id, reduce } => {
            let reports = if reduce {
                client.get_reduce_task_reports(&id).await?
            } else {
                client.get_map_task_reports(&id).await?
            };
            for r in &reports {
                print_report(r);
            }
        }
        Commands::Diagnostics { id, task, attempt } => {
            let diags = client.get_task_diagnostics(&id, &task, &attempt).await?;
            if diags.is_empty() {
                println!("Sin diagnósticos");
            }
            for d in diags {
                println!("{d}");
            }
        }
        Commands::Fs => {
            println!("{}", client.get_filesystem_name().await?);
        }
        Commands::Wait { id, interval } => wait(&client, &id, interval).await?,
        Commands::Trackers => {
            let trackers = client.list_trackers().await?;
            if trackers.is_empty() {
                println!("No hay trackers registrados");
            }
            for t in trackers {
                println!(
                    "{} ({}){}  maps={} reduces={}  en curso={}  ok={} fallidas={}  hb hace {}s",
                    t.tracker_id,
                    t.hostname,
                    if t.dead { " [muerto]" } else { "" },
                    t.map_slots,
                    t.reduce_slots,
                    t.running_attempts,
                    t.tasks_succeeded,
                    t.tasks_failed,
                    t.last_heartbeat_secs_ago
                );
            }
        }
    }

    Ok(())
}

/// Consulta eventos nuevos (desde el último visto) hasta que el job termina.
async fn wait(client: &JobClient, id: &JobId, interval: u64) -> Result<()> {
    let mut next_event = 0u32;
    loop {
        let events = client.get_task_completion_events(id, next_event, 100).await?;
        for e in &events {
            println!("#{} {} {:?}", e.event_id, e.attempt_id, e.status);
            next_event = e.event_id + 1;
        }

        let Some(status) = client.get_job_status(id).await? else {
            println!("No se encontró el job con id {id}");
            return Ok(());
        };
        if status.state.is_terminal() && events.is_empty() {
            print_status(&status);
            return Ok(());
        }
        if events.is_empty() {
            tokio::time::sleep(Duration::from_secs(interval)).await;
        }
    }
}

fn print_status(s: &JobStatus) {
    println!("  id: {}", s.job_id);
    println!("  estado: {:?}", s.state);
    println!(
        "  progreso: map {:.0}% reduce {:.0}%",
        s.map_progress * 100.0,
        s.reduce_progress * 100.0
    );
    println!("  prioridad: {:?}", s.priority);
    println!("  tareas fallidas: {}  matadas: {}", s.failed_tasks, s.killed_tasks);
    if let Some(end) = s.finish_time {
        println!("  terminó: {end}");
    }
}

fn print_report(r: &TaskReport) {
    println!(
        "{}  {:?}  {:.0}%  hosts=[{}]",
        r.task_id,
        r.state,
        r.progress * 100.0,
        r.split_hosts.join(",")
    );
    for d in &r.diagnostics {
        println!("    {d}");
    }
}
