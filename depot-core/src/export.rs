//! Human-readable reports of a store

use anyhow::Result;
use std::fs;
use std::path::Path;

use crate::models::{DepotStore, TransferRequest, Work, WORK_NOT_FOUND_LABEL};

fn work_label(store: &DepotStore, id: &uuid::Uuid) -> String {
    store
        .get_work(id)
        .map(|w| w.title.clone())
        .unwrap_or_else(|| WORK_NOT_FOUND_LABEL.to_string())
}

fn user_label(store: &DepotStore, id: &uuid::Uuid) -> String {
    store
        .get_user(id)
        .map(|u| u.user_key.clone())
        .unwrap_or_else(|| id.to_string())
}

fn render_work(store: &DepotStore, work: &Work, output: &mut String) {
    output.push_str(&format!("### {}\n\n", work.title));
    output.push_str(&format!("- **ID:** {}\n", work.id));
    output.push_str(&format!("- **Depositor:** {}\n", work.depositor));
    if !work.edit_users.is_empty() {
        let editors: Vec<&str> = work.edit_users.iter().map(|s| s.as_str()).collect();
        output.push_str(&format!("- **Editors:** {}\n", editors.join(", ")));
    }

    let parents = store.in_works_ids(&work.id);
    if !parents.is_empty() {
        output.push_str("- **In works:**\n");
        for parent in &parents {
            output.push_str(&format!("  - {}\n", work_label(store, parent)));
        }
    }
    if !work.ordered_member_ids.is_empty() {
        output.push_str("- **Members:**\n");
        for member in &work.ordered_member_ids {
            output.push_str(&format!("  1. {}\n", work_label(store, member)));
        }
    }
    output.push('\n');
}

fn render_transfer(store: &DepotStore, request: &TransferRequest, output: &mut String) {
    output.push_str(&format!(
        "| {} | {} | {} | {} | {} |\n",
        work_label(store, &request.work_id),
        user_label(store, &request.sending_user),
        user_label(store, &request.receiving_user),
        request.status,
        request
            .fulfillment_date
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_default(),
    ));
}

/// Renders works and transfer requests as Markdown
pub fn render_markdown(store: &DepotStore) -> String {
    let mut output = String::new();

    let title = if store.name.is_empty() {
        "Depot"
    } else {
        &store.name
    };
    output.push_str(&format!("# {}\n\n", title));

    output.push_str("## Works\n\n");
    let mut works: Vec<&Work> = store.works.iter().collect();
    works.sort_by(|a, b| a.title.cmp(&b.title));
    for work in works {
        render_work(store, work, &mut output);
    }

    if !store.transfer_requests.is_empty() {
        output.push_str("## Transfers\n\n");
        output.push_str("| Work | From | To | Status | Fulfilled |\n");
        output.push_str("|------|------|----|--------|-----------|\n");
        let mut requests: Vec<&TransferRequest> = store.transfer_requests.iter().collect();
        requests.sort_by_key(|r| r.created_at);
        for request in requests {
            render_transfer(store, request, &mut output);
        }
    }

    output
}

/// Writes the Markdown report to `output_path`
pub fn export_markdown(store: &DepotStore, output_path: &Path) -> Result<()> {
    fs::write(output_path, render_markdown(store))?;
    log::info!("exported report to {}", output_path.display());
    Ok(())
}
