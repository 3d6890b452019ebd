//! Inbox commands: list, unread, read, read-all, delete, clear.
//!
//! Mutations go through `NotificationStore`, so the printed state is what
//! the engine ends up with after confirm or rollback.

use anyhow::Result;
use storefront_inbox::model::PageRequest;
use storefront_inbox::{InboxState, NotificationStore, SyncError};

use super::{Ctx, print_json};

pub async fn list(ctx: &Ctx, page: u32, limit: u32) -> Result<()> {
    let store = NotificationStore::with_page(ctx.api.clone(), PageRequest { page, limit });
    store.fetch().await?;
    let state = store.state();
    if ctx.json {
        print_json(&state)?;
    } else {
        print!("{}", render_table(&state));
    }
    Ok(())
}

pub async fn unread(ctx: &Ctx) -> Result<()> {
    let n = ctx.api.unread_count().await?;
    if ctx.json {
        print_json(&serde_json::json!({ "unreadCount": n }))?;
    } else {
        println!("{n} unread");
    }
    Ok(())
}

pub async fn read(ctx: &Ctx, id: &str) -> Result<()> {
    let store = loaded(ctx).await?;
    let result = store.mark_as_read(id).await;
    report(ctx, &store, result, &format!("Marked {id} as read."))
}

pub async fn read_all(ctx: &Ctx) -> Result<()> {
    let store = loaded(ctx).await?;
    let result = store.mark_all_as_read().await;
    report(ctx, &store, result, "Marked all notifications as read.")
}

pub async fn delete(ctx: &Ctx, id: &str) -> Result<()> {
    let store = loaded(ctx).await?;
    let result = store.delete_notification(id).await;
    report(ctx, &store, result, &format!("Notification {id} deleted."))
}

pub async fn clear(ctx: &Ctx) -> Result<()> {
    let store = loaded(ctx).await?;
    let result = store.clear_all_notifications().await;
    report(ctx, &store, result, "All notifications deleted.")
}

/// Store holding the first page, so optimistic changes have something to
/// act on.
async fn loaded(ctx: &Ctx) -> Result<NotificationStore> {
    let store = NotificationStore::with_page(ctx.api.clone(), PageRequest::first(ctx.page_size));
    store.fetch().await?;
    Ok(store)
}

fn report(
    ctx: &Ctx,
    store: &NotificationStore,
    result: Result<(), SyncError>,
    done: &str,
) -> Result<()> {
    let state = store.state();
    if ctx.json {
        print_json(&state)?;
    } else {
        match &result {
            Ok(()) => println!("{done}"),
            Err(e) => println!("Rolled back: {e}"),
        }
        println!(
            "{} shown, {} unread on this page, {} unread total.",
            state.notifications.len(),
            state.unread_count,
            state.total_unread
        );
    }
    result.map_err(Into::into)
}

/// Plain-text table of the current page.
pub fn render_table(state: &InboxState) -> String {
    let mut out = format!(
        "{:<26} {:<13} {:<5} {:<17} {}\n",
        "ID", "CATEGORY", "READ", "CREATED", "TITLE"
    );
    for n in &state.notifications {
        out.push_str(&format!(
            "{:<26} {:<13} {:<5} {:<17} {}\n",
            n.id,
            n.category.as_str(),
            if n.read { "yes" } else { "no" },
            n.created_at.format("%Y-%m-%d %H:%M"),
            n.title
        ));
    }
    out.push_str(&format!(
        "\n{} unread on this page, {} unread total.\n",
        state.unread_count, state.total_unread
    ));
    out
}
