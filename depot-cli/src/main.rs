mod cli;
mod prompts;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use std::collections::BTreeSet;
use std::env;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use depot_core::db::{
    export_backend_to_json, import_json_to_backend, infer_backend_type, migrate_sqlite_to_yaml,
    migrate_yaml_to_sqlite,
};
use depot_core::{
    create_backend, determine_repository_path, export_markdown, get_registry_path, Ability,
    ActorChain, BackendType, ChainResult, DatabaseBackend, DepositorAbility, NewTransfer,
    Registry, Repository, TransferRequest, TransferService, TransferStatus, User, Work,
    WorkAttributes,
};

use crate::cli::{
    Cli, Command, DbCommand, ExportFormat, TransferCommand, UserCommand, WorkCommand,
};

const LOG_ENV: &str = "DEPOT_LOG";
const USER_ENV: &str = "DEPOT_USER";

/// The open store plus who is acting on it
struct Session {
    path: PathBuf,
    backend: Box<dyn DatabaseBackend>,
    acting_user: Option<String>,
}

impl Session {
    fn backend(&self) -> &dyn DatabaseBackend {
        self.backend.as_ref()
    }

    fn principal(&self) -> Result<User> {
        let key = self
            .acting_user
            .clone()
            .or_else(|| env::var(USER_ENV).ok())
            .with_context(|| format!("No acting user: pass --as <user-key> or set {}", USER_ENV))?;
        Ok(self.backend.find_user_by_key(&key)?)
    }

    fn resolve_work(&self, input: &str) -> Result<Uuid> {
        let ids = self.backend.list_works()?.into_iter().map(|w| w.id);
        resolve_id(input, ids, "work")
    }

    fn resolve_transfer(&self, input: &str) -> Result<Uuid> {
        let ids = self
            .backend
            .list_transfer_requests()?
            .into_iter()
            .map(|r| r.id);
        resolve_id(input, ids, "transfer request")
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::new().filter_or(LOG_ENV, "warn")).init();

    let cli = Cli::parse();

    // Registering does not need a store to be open
    if let Command::Db(DbCommand::Register {
        name,
        path,
        description,
        default,
        interactive,
    }) = &cli.command
    {
        return register_repository(name, path, description, *default, *interactive);
    }

    let path = determine_repository_path(cli.repo.as_deref())?;
    log::debug!("using store {:?}", path);
    let backend = create_backend(&path, cli.backend.map(Into::into))?;
    let session = Session {
        path,
        backend,
        acting_user: cli.acting_user.clone(),
    };

    match &cli.command {
        Command::User(cmd) => handle_user_command(cmd, &session)?,
        Command::Work(cmd) => handle_work_command(cmd, &session)?,
        Command::Transfer(cmd) => handle_transfer_command(cmd, &session)?,
        Command::Db(cmd) => handle_db_command(cmd, &session)?,
    }

    Ok(())
}

/// Accepts a full UUID or an unambiguous prefix of one
fn resolve_id(input: &str, ids: impl Iterator<Item = Uuid>, kind: &str) -> Result<Uuid> {
    if let Ok(id) = Uuid::parse_str(input) {
        return Ok(id);
    }
    if input.is_empty() {
        anyhow::bail!("Empty {} ID", kind);
    }

    let matches: Vec<Uuid> = ids.filter(|id| id.to_string().starts_with(input)).collect();
    match matches.as_slice() {
        [id] => Ok(*id),
        [] => anyhow::bail!("No {} matches '{}'", kind, input),
        _ => anyhow::bail!(
            "'{}' matches {} {}s; use more characters",
            input,
            matches.len(),
            kind
        ),
    }
}

fn short_id(id: &Uuid) -> String {
    id.to_string()[..8].to_string()
}

// =========================================================================
// Users
// =========================================================================

fn handle_user_command(cmd: &UserCommand, session: &Session) -> Result<()> {
    match cmd {
        UserCommand::Add { key, name, email } => {
            let mut user = User::new(key.clone(), name.clone().unwrap_or_else(|| key.clone()));
            if let Some(email) = email {
                user.email = email.clone();
            }
            let user = session.backend().add_user(user)?;
            println!("{} Added user {} ({})", "✓".green(), user.user_key, user.name);
        }
        UserCommand::List => {
            let users = session.backend().list_users()?;
            if users.is_empty() {
                println!("{}", "No users found.".yellow());
                return Ok(());
            }

            println!("{:<30} | {:<25} | {:<30}", "Key", "Name", "Email");
            println!("{}", "-".repeat(90));
            for user in users {
                println!("{:<30} | {:<25} | {:<30}", user.user_key, user.name, user.email);
            }
        }
    }

    Ok(())
}

// =========================================================================
// Works
// =========================================================================

fn handle_work_command(cmd: &WorkCommand, session: &Session) -> Result<()> {
    match cmd {
        WorkCommand::Add {
            title,
            parents,
            interactive,
        } => {
            let attributes = if *interactive || title.is_none() {
                let answers = prompts::prompt_new_work(&session.backend().list_works()?)?;
                WorkAttributes::titled(answers.title).with_parents(answers.parent_ids)
            } else {
                let parent_ids = parents
                    .iter()
                    .map(|p| session.resolve_work(p))
                    .collect::<Result<Vec<_>>>()?;
                WorkAttributes {
                    title: title.clone(),
                    edit_users: None,
                    parent_work_ids: if parent_ids.is_empty() {
                        None
                    } else {
                        Some(parent_ids)
                    },
                }
            };
            add_work(session, attributes)?;
        }
        WorkCommand::Edit {
            id,
            title,
            editors,
            parents,
            no_parents,
        } => {
            let work_id = session.resolve_work(id)?;
            let parent_work_ids = if *no_parents {
                Some(Vec::new())
            } else if parents.is_empty() {
                None
            } else {
                Some(
                    parents
                        .iter()
                        .map(|p| session.resolve_work(p))
                        .collect::<Result<Vec<_>>>()?,
                )
            };
            let attributes = WorkAttributes {
                title: title.clone(),
                edit_users: if editors.is_empty() {
                    None
                } else {
                    Some(editors.iter().cloned().collect::<BTreeSet<_>>())
                },
                parent_work_ids,
            };
            edit_work(session, &work_id, attributes)?;
        }
        WorkCommand::Show { id } => {
            let work_id = session.resolve_work(id)?;
            show_work(session, &work_id)?;
        }
        WorkCommand::List => list_works(session)?,
        WorkCommand::Del { id, yes } => {
            let work_id = session.resolve_work(id)?;
            delete_work(session, &work_id, *yes)?;
        }
    }

    Ok(())
}

fn report_chain(result: &ChainResult, done: &str) -> Result<()> {
    if result.is_success() {
        println!("{} {} {}", "✓".green(), done, result.work.id);
        return Ok(());
    }

    for error in result.outcome.errors() {
        println!("  {} {}", "✗".red(), error);
    }
    anyhow::bail!("{} failed for {}", done, result.work.title)
}

fn add_work(session: &Session, attributes: WorkAttributes) -> Result<()> {
    let principal = session.principal()?;
    let result = ActorChain::standard().create_work(
        session.backend(),
        &DepositorAbility,
        &principal,
        attributes,
    )?;
    report_chain(&result, "Created work")
}

fn edit_work(session: &Session, work_id: &Uuid, attributes: WorkAttributes) -> Result<()> {
    let principal = session.principal()?;
    let work = session.backend().find_work(work_id)?;
    if !DepositorAbility.can_edit(&principal, &work) {
        anyhow::bail!("{} may not edit '{}'", principal.user_key, work.title);
    }

    let result = ActorChain::standard().update_work(
        session.backend(),
        &DepositorAbility,
        &principal,
        work_id,
        attributes,
    )?;
    report_chain(&result, "Updated work")
}

fn work_title(backend: &dyn DatabaseBackend, id: &Uuid) -> Result<String> {
    Ok(backend
        .get_work(id)?
        .map(|w| w.title)
        .unwrap_or_else(|| depot_core::WORK_NOT_FOUND_LABEL.to_string()))
}

fn show_work(session: &Session, work_id: &Uuid) -> Result<()> {
    let backend = session.backend();
    let work = backend.find_work(work_id)?;

    println!("{}", work.title.bold());
    println!("  ID: {}", work.id);
    println!("  Depositor: {}", work.depositor);
    let editors: Vec<&str> = work.edit_users.iter().map(|s| s.as_str()).collect();
    println!("  Editors: {}", editors.join(", "));
    println!("  Created: {}", work.created_at.format("%Y-%m-%d %H:%M"));
    println!("  Modified: {}", work.modified_at.format("%Y-%m-%d %H:%M"));

    let parents = backend.in_works_ids(&work.id)?;
    if !parents.is_empty() {
        println!("  {}", "In works:".cyan());
        for parent in &parents {
            println!("    {} {}", short_id(parent), work_title(backend, parent)?);
        }
    }

    if !work.ordered_member_ids.is_empty() {
        println!("  {}", "Members:".cyan());
        for (i, member) in work.ordered_member_ids.iter().enumerate() {
            println!("    {}. {} {}", i + 1, short_id(member), work_title(backend, member)?);
        }
    }

    let service = TransferService::new(backend);
    if let Some(open) = backend.open_transfer_for_work(&work.id, None)? {
        let receiver = backend.find_user(&open.receiving_user)?;
        println!(
            "  {} pending transfer {} to {}",
            "!".yellow(),
            short_id(&open.id),
            receiver.user_key
        );
    }
    let history = service
        .with_status(TransferStatus::Accepted)?
        .into_iter()
        .filter(|r| r.work_id == work.id)
        .count();
    if history > 0 {
        println!("  Accepted transfers: {}", history);
    }

    Ok(())
}

fn list_works(session: &Session) -> Result<()> {
    let backend = session.backend();
    let mut works: Vec<Work> = backend.list_works()?;
    if works.is_empty() {
        println!("{}", "No works found.".yellow());
        return Ok(());
    }
    works.sort_by(|a, b| a.title.cmp(&b.title));

    println!(
        "{:<8} | {:<40} | {:<25} | {:>7} | {:>7}",
        "ID", "Title", "Depositor", "Parents", "Members"
    );
    println!("{}", "-".repeat(100));
    for work in works {
        println!(
            "{:<8} | {:<40} | {:<25} | {:>7} | {:>7}",
            short_id(&work.id),
            work.title,
            work.depositor,
            backend.in_works_ids(&work.id)?.len(),
            work.ordered_member_ids.len()
        );
    }

    Ok(())
}

fn delete_work(session: &Session, work_id: &Uuid, skip_confirm: bool) -> Result<()> {
    let backend = session.backend();
    let principal = session.principal()?;
    let work = backend.find_work(work_id)?;
    if !DepositorAbility.can_edit(&principal, &work) {
        anyhow::bail!("{} may not delete '{}'", principal.user_key, work.title);
    }

    println!("{}", "Work to delete:".yellow());
    println!("  ID: {}", work.id);
    println!("  Title: {}", work.title);
    let parents = backend.in_works_ids(&work.id)?;
    if !parents.is_empty() {
        println!("  Linked into {} work(s); those links go too.", parents.len());
    }

    if !skip_confirm && !prompts::confirm("Are you sure you want to delete this work?")? {
        println!("{}", "Deletion cancelled.".yellow());
        return Ok(());
    }

    backend.destroy_work(&work.id)?;
    println!("{}", "Work deleted successfully!".green());

    Ok(())
}

// =========================================================================
// Transfers
// =========================================================================

fn handle_transfer_command(cmd: &TransferCommand, session: &Session) -> Result<()> {
    let backend = session.backend();
    let service = TransferService::new(backend);

    match cmd {
        TransferCommand::Request { work, to, comment } => {
            let principal = session.principal()?;
            let work_id = session.resolve_work(work)?;
            let work = backend.find_work(&work_id)?;
            if !DepositorAbility.can_edit(&principal, &work) {
                anyhow::bail!("{} may not transfer '{}'", principal.user_key, work.title);
            }

            let request = service.create(NewTransfer {
                work_id,
                sending_user: principal.id,
                transfer_to: to.clone(),
                sender_comment: comment.clone(),
            })?;
            println!(
                "{} Offered '{}' to {} (request {})",
                "✓".green(),
                work.title,
                to,
                short_id(&request.id)
            );
        }
        TransferCommand::Accept { id } => {
            let request = addressed_to_principal(session, id)?;
            let request = service.transfer(&request.id)?;
            println!(
                "{} Accepted '{}'",
                "✓".green(),
                service.status_label(&request)?
            );
        }
        TransferCommand::Reject { id, comment } => {
            let request = addressed_to_principal(session, id)?;
            let request = service.reject(&request.id, comment.clone())?;
            println!(
                "{} Rejected '{}'",
                "✓".green(),
                service.status_label(&request)?
            );
        }
        TransferCommand::Cancel { id } => {
            let principal = session.principal()?;
            let request = backend.find_transfer_request(&session.resolve_transfer(id)?)?;
            if request.sending_user != principal.id {
                anyhow::bail!("Only the sender can cancel this transfer");
            }
            let request = service.cancel(&request.id)?;
            println!(
                "{} Canceled transfer of '{}'",
                "✓".green(),
                service.status_label(&request)?
            );
        }
        TransferCommand::List {
            sent,
            received,
            status,
        } => {
            let mut requests = if *sent {
                service.sent_by(&session.principal()?.id)?
            } else if *received {
                service.received_by(&session.principal()?.id)?
            } else {
                backend.list_transfer_requests()?
            };
            if let Some(status) = status {
                let status: TransferStatus = (*status).into();
                requests.retain(|r| r.status == status);
            }
            list_transfers(&service, backend, &requests)?;
        }
    }

    Ok(())
}

fn addressed_to_principal(session: &Session, id: &str) -> Result<TransferRequest> {
    let principal = session.principal()?;
    let request = session
        .backend()
        .find_transfer_request(&session.resolve_transfer(id)?)?;
    if request.receiving_user != principal.id {
        anyhow::bail!("This transfer is not addressed to {}", principal.user_key);
    }
    Ok(request)
}

fn list_transfers(
    service: &TransferService<'_>,
    backend: &dyn DatabaseBackend,
    requests: &[TransferRequest],
) -> Result<()> {
    if requests.is_empty() {
        println!("{}", "No transfer requests found.".yellow());
        return Ok(());
    }

    println!(
        "{:<8} | {:<30} | {:<20} | {:<20} | {:<10} | {:<10}",
        "ID", "Work", "From", "To", "Status", "Fulfilled"
    );
    println!("{}", "-".repeat(110));

    for request in requests {
        let status = match request.status {
            TransferStatus::Pending => "Pending".yellow(),
            TransferStatus::Accepted => "Accepted".green(),
            TransferStatus::Rejected => "Rejected".red(),
            TransferStatus::Canceled => "Canceled".dimmed(),
        };
        let user_key = |id: &Uuid| -> Result<String> {
            Ok(backend
                .get_user(id)?
                .map(|u| u.user_key)
                .unwrap_or_else(|| short_id(id)))
        };
        let fulfilled = request
            .fulfillment_date
            .map(|d| d.with_timezone(&chrono::Local).format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "-".to_string());

        println!(
            "{:<8} | {:<30} | {:<20} | {:<20} | {:<10} | {:<10}",
            short_id(&request.id),
            service.status_label(request)?,
            user_key(&request.sending_user)?,
            user_key(&request.receiving_user)?,
            status,
            fulfilled
        );
    }

    Ok(())
}

// =========================================================================
// Registry and storage
// =========================================================================

fn register_repository(
    name: &Option<String>,
    path: &Option<PathBuf>,
    description: &Option<String>,
    default: bool,
    interactive: bool,
) -> Result<()> {
    let registry_path = get_registry_path()?;
    let mut registry = Registry::load_or_default(&registry_path)?;

    let should_be_interactive =
        interactive || (name.is_none() && path.is_none() && description.is_none());

    let (repo_name, repo_path, repo_description, is_default) = if should_be_interactive {
        prompts::prompt_register_repository()?
    } else {
        let repo_name = name
            .clone()
            .ok_or_else(|| anyhow::anyhow!("Repository name is required"))?;
        let repo_path = path
            .clone()
            .ok_or_else(|| anyhow::anyhow!("Repository path is required"))?;
        (repo_name, repo_path, description.clone().unwrap_or_default(), default)
    };

    registry.register(
        repo_name.clone(),
        repo_path.to_string_lossy().to_string(),
        repo_description,
    );
    if is_default {
        registry.set_default(&repo_name)?;
    }
    registry.save(&registry_path)?;

    println!(
        "{} Repository '{}' registered successfully.",
        "✓".green(),
        repo_name
    );
    if is_default {
        println!("{} Repository '{}' set as default.", "✓".green(), repo_name);
    }

    Ok(())
}

fn handle_db_command(cmd: &DbCommand, session: &Session) -> Result<()> {
    match cmd {
        DbCommand::Register {
            name,
            path,
            description,
            default,
            interactive,
        } => register_repository(name, path, description, *default, *interactive)?,
        DbCommand::Path { name } => {
            if let Some(repo_name) = name {
                let registry = Registry::load_or_default(get_registry_path()?)?;
                match registry.get(repo_name) {
                    Some(entry) => println!("{}", entry.path),
                    None => println!(
                        "{} Repository '{}' not found in registry. Use 'depot db register' to add it.",
                        "!".yellow(),
                        repo_name
                    ),
                }
            } else {
                println!("{}", session.path.display());
            }
        }
        DbCommand::Migrate { output, yes } => migrate(session, output, *yes)?,
        DbCommand::Export { format, output } => {
            export(session, *format, output.as_deref())?;
        }
        DbCommand::Import { input, yes } => {
            if !*yes
                && !prompts::confirm(&format!(
                    "Replace the contents of {}?",
                    session.path.display()
                ))?
            {
                println!("{}", "Import cancelled.".yellow());
                return Ok(());
            }
            import_json_to_backend(input, session.backend())?;
            println!("{} Imported {}", "✓".green(), input.display());
        }
        DbCommand::Stats => {
            let stats = session.backend().stats()?;
            println!("{} ({})", session.path.display(), stats.backend_type);
            println!("  Works: {}", stats.work_count);
            println!("  Users: {}", stats.user_count);
            println!(
                "  Transfers: {} ({} open)",
                stats.transfer_count, stats.open_transfer_count
            );
        }
    }

    Ok(())
}

fn migrate(session: &Session, output: &Path, skip_confirm: bool) -> Result<()> {
    if output.exists()
        && !skip_confirm
        && !prompts::confirm(&format!("{} exists. Overwrite its contents?", output.display()))?
    {
        println!("{}", "Migration cancelled.".yellow());
        return Ok(());
    }

    let source = session.backend().backend_type();
    let target = infer_backend_type(output);
    let moved = match (source, target) {
        (BackendType::Yaml, BackendType::Sqlite) => migrate_yaml_to_sqlite(&session.path, output)?,
        (BackendType::Sqlite, BackendType::Yaml) => migrate_sqlite_to_yaml(&session.path, output)?,
        _ => anyhow::bail!(
            "Cannot migrate {} to {}; pick a target with the other backend's extension",
            source,
            target
        ),
    };

    println!(
        "{} Migrated {} records to {}",
        "✓".green(),
        moved,
        output.display()
    );
    Ok(())
}

fn export(session: &Session, format: ExportFormat, output: Option<&Path>) -> Result<()> {
    match format {
        ExportFormat::Json => {
            let output_path = output
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| PathBuf::from("depot.json"));
            export_backend_to_json(session.backend(), &output_path)?;
            println!("Exported to JSON: {}", output_path.display());
        }
        ExportFormat::Markdown => {
            let output_path = output
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| PathBuf::from("depot.md"));
            export_markdown(&session.backend().load()?, &output_path)?;
            println!("Exported report: {}", output_path.display());
        }
    }

    Ok(())
}
