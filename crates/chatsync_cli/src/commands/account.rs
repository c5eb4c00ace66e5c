//! Session commands.

use super::{dispatcher, CommandResult};
use chatsync_engine::SyncConfig;

/// Prints the signed-in user.
pub async fn whoami(config: &SyncConfig) -> CommandResult {
    let user = dispatcher(config)?.current_user().await?;
    if !user.is_authenticated {
        return Err("not signed in".into());
    }
    match (&user.email, user.id) {
        (Some(email), Some(id)) => println!("{email} (user {id})"),
        (Some(email), None) => println!("{email}"),
        (None, Some(id)) => println!("user {id}"),
        (None, None) => println!("signed in"),
    }
    Ok(())
}

/// Ends the server session.
pub async fn logout(config: &SyncConfig) -> CommandResult {
    dispatcher(config)?.logout().await?;
    println!("Signed out");
    Ok(())
}
