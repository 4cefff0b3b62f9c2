//! Adding and removing members of the live cluster.

use crate::client::{ClusterAdmin, Connector, Member};
use crate::config::ClientConfig;
use crate::utils::errors::{RecoveryError, Result};
use tracing::info;

/// Identifier of the member called exactly `name`, or 0 when there is none.
pub fn resolve_member_id(members: &[Member], name: &str) -> u64 {
    members
        .iter()
        .find(|m| m.name == name)
        .map(|m| m.id)
        .unwrap_or(0)
}

/// Announce a new member with `peer_urls` to the cluster.
pub async fn add_member<C: Connector>(
    connector: &C,
    config: &ClientConfig,
    peer_urls: &[String],
) -> Result<Member> {
    if peer_urls.is_empty() {
        return Err(RecoveryError::Precondition(
            "a new member needs at least one peer URL".to_string(),
        ));
    }

    let mut admin = connector.connect(config).await?;
    let member = admin.add_member(peer_urls).await?;
    info!(
        "Added member {:x} with peer URLs {:?} via {}",
        member.id,
        member.peer_urls,
        admin.endpoint()
    );
    Ok(member)
}

/// Remove the member called `name`.
///
/// Membership is listed fresh on every call; a name resolved earlier may
/// point at a member that has since been replaced.
pub async fn remove_member<C: Connector>(
    connector: &C,
    config: &ClientConfig,
    name: &str,
) -> Result<u64> {
    let mut admin = connector.connect(config).await?;
    let members = admin.list_members().await?;

    let id = resolve_member_id(&members, name);
    if id == 0 {
        return Err(RecoveryError::NotFound(format!(
            "member {:?} in cluster at {} ({} members)",
            name,
            admin.endpoint(),
            members.len()
        )));
    }

    admin.remove_member(id).await?;
    info!("Removed member {} ({:x}) via {}", name, id, admin.endpoint());
    Ok(id)
}
