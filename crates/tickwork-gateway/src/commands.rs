//! Owner-side commands run directly against the database.
//!
//! Change notifications are in-process only, so a server already running on
//! the same database picks these changes up at its next start.

use std::time::Duration;

use anyhow::Context;
use clap::Subcommand;
use serde_json::json;
use tickwork_core::{JobId, TenantId};
use tickwork_scheduler::{CipherAction, JobDraft, JobTask, SchedulerService};

#[derive(Subcommand, Debug)]
pub enum TenantAction {
    /// Create a tenant record
    Add {
        id: String,
        /// Secret used for the tenant's encrypt/decrypt requests
        #[arg(long)]
        secret: Option<String>,
        /// Opening credit balance
        #[arg(long, default_value = "0")]
        credits: u64,
    },
    /// Delete a tenant and everything stored for it
    Remove { id: String },
}

#[derive(Subcommand, Debug)]
pub enum JobAction {
    /// Add a job
    Add {
        tenant: String,
        #[arg(long)]
        name: String,
        /// Cron expression, e.g. "*/5 * * * *"
        #[arg(long)]
        schedule: String,
        /// Job task as JSON, e.g. '{"kind":"ping","url":"https://example.com"}'
        #[arg(long)]
        task: String,
        /// Store the job disabled
        #[arg(long)]
        disabled: bool,
    },
    /// List a tenant's jobs
    List { tenant: String },
    /// Run a job immediately
    Run { tenant: String, job: String },
    Enable { tenant: String, job: String },
    Disable { tenant: String, job: String },
    Delete { tenant: String, job: String },
}

#[derive(Subcommand, Debug)]
pub enum CreditsAction {
    Grant { tenant: String, amount: u64 },
    Show { tenant: String },
}

#[derive(Subcommand, Debug)]
pub enum CipherCommand {
    Encrypt { tenant: String, payload: String },
    Decrypt { tenant: String, payload: String },
}

fn print_json(value: &impl serde::Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub async fn tenant(service: &SchedulerService, action: TenantAction) -> anyhow::Result<()> {
    match action {
        TenantAction::Add {
            id,
            secret,
            credits,
        } => {
            let tenant = TenantId::from(id);
            service
                .register_tenant(&tenant, secret.as_deref(), credits)
                .await?;
            print_json(&json!({ "tenant": tenant, "credits": service.balance(&tenant).await? }))
        }
        TenantAction::Remove { id } => {
            service.remove_tenant(&TenantId::from(id)).await?;
            Ok(())
        }
    }
}

pub async fn job(service: &SchedulerService, action: JobAction) -> anyhow::Result<()> {
    match action {
        JobAction::Add {
            tenant,
            name,
            schedule,
            task,
            disabled,
        } => {
            let task: JobTask = serde_json::from_str(&task).context("invalid --task JSON")?;
            let draft = JobDraft {
                name,
                task,
                schedule,
                enabled: !disabled,
            };
            let job = service.create_job(&tenant.into(), draft).await?;
            print_json(&job)
        }
        JobAction::List { tenant } => print_json(&service.jobs(&tenant.into()).await?),
        JobAction::Run { tenant, job } => {
            let outcome = service
                .run_job_now(&tenant.into(), &JobId::from(job))
                .await?;
            print_json(&outcome)
        }
        JobAction::Enable { tenant, job } => {
            service
                .set_job_enabled(&tenant.into(), &JobId::from(job), true)
                .await?;
            Ok(())
        }
        JobAction::Disable { tenant, job } => {
            service
                .set_job_enabled(&tenant.into(), &JobId::from(job), false)
                .await?;
            Ok(())
        }
        JobAction::Delete { tenant, job } => {
            service.delete_job(&tenant.into(), &JobId::from(job)).await?;
            Ok(())
        }
    }
}

pub async fn credits(service: &SchedulerService, action: CreditsAction) -> anyhow::Result<()> {
    let (tenant, balance) = match action {
        CreditsAction::Grant { tenant, amount } => {
            let tenant = TenantId::from(tenant);
            let balance = service.grant_credits(&tenant, amount).await?;
            (tenant, balance)
        }
        CreditsAction::Show { tenant } => {
            let tenant = TenantId::from(tenant);
            let balance = service.balance(&tenant).await?;
            (tenant, balance)
        }
    };
    print_json(&json!({ "tenant": tenant, "credits": balance }))
}

pub async fn logs(service: &SchedulerService, tenant: &TenantId, limit: usize) -> anyhow::Result<()> {
    print_json(&service.recent_logs(tenant, limit).await?)
}

pub async fn cipher(service: &SchedulerService, command: CipherCommand) -> anyhow::Result<()> {
    let (tenant, action, payload) = match command {
        CipherCommand::Encrypt { tenant, payload } => (tenant, CipherAction::Encrypt, payload),
        CipherCommand::Decrypt { tenant, payload } => (tenant, CipherAction::Decrypt, payload),
    };
    let submission = service
        .submit_queue_item(&tenant.into(), action, &payload)
        .await?;
    // let the post-response writes land before the process exits
    service.flush_background().await;
    print_json(&submission)
}

pub async fn reclaim(
    service: &SchedulerService,
    tenant: &TenantId,
    older_than_secs: u64,
) -> anyhow::Result<()> {
    let reclaimed = service
        .reclaim_stranded(tenant, Duration::from_secs(older_than_secs))
        .await?;
    print_json(&json!({ "tenant": tenant, "reclaimed": reclaimed }))
}
