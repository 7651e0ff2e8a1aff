//! Identity command implementations.

use crate::cli::commands::open_storage;
use crate::cli::IdentityCommands;
use crate::error::Result;
use std::path::PathBuf;

/// Execute identity commands.
///
/// # Errors
///
/// Returns an error if the store is not initialized or the operation fails.
pub fn execute(
    command: &IdentityCommands,
    db_path: Option<&PathBuf>,
    actor: Option<&str>,
    json: bool,
) -> Result<()> {
    let mut storage = open_storage(db_path, actor)?;

    match command {
        IdentityCommands::Show => {
            let identity = storage.require_identity()?;
            if json {
                println!("{}", serde_json::to_string(&identity)?);
            } else {
                let created = chrono::DateTime::from_timestamp_millis(identity.created_at)
                    .map_or_else(|| identity.created_at.to_string(), |t| t.to_rfc3339());
                println!("Device:          {}", identity.device_id);
                println!("Prefix:          {}", identity.document_prefix);
                println!("Local sequence:  {}", identity.local_sequence);
                println!("Document count:  {}", identity.document_counter);
                println!("Created:         {created}");
            }
        }
        IdentityCommands::SetPrefix { prefix } => {
            let prefix = storage.set_document_prefix(prefix)?;
            if json {
                println!("{}", serde_json::json!({ "document_prefix": prefix }));
            } else {
                println!("Document prefix set to {prefix}");
            }
        }
        IdentityCommands::NextNumber => {
            let number = storage.next_document_number()?;
            if json {
                println!("{}", serde_json::json!({ "number": number }));
            } else {
                println!("{number}");
            }
        }
    }

    Ok(())
}
