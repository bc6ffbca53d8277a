//! Audio space details.

use super::{decode_err, normalize_graphql_user, parse_millis};
use crate::wire::graphql::{AudioSpace, UserResult};
use crate::{ScraperError, Space, SpaceId, Trove, UserId};

/// Normalize a space detail response. The space is marked as fetched.
pub fn space_to_trove(space: &AudioSpace) -> Result<Trove, ScraperError> {
    let mut trove = Trove::new();
    let metadata = &space.metadata;

    let created_by_id = match metadata
        .creator_results
        .as_ref()
        .and_then(|r| r.result.as_ref())
    {
        Some(UserResult::User(user)) => {
            let user = normalize_graphql_user(user)?;
            let id = user.id;
            trove.insert_user(user);
            Some(id)
        }
        _ => None,
    };

    let participants = &space.participants;
    let mut participant_ids: Vec<UserId> = Vec::new();
    for participant in participants
        .admins
        .iter()
        .chain(&participants.speakers)
        .chain(&participants.listeners)
    {
        let Some(results) = &participant.user_results else {
            continue;
        };
        let id = match &results.result {
            Some(UserResult::User(user)) => {
                let user = normalize_graphql_user(user)?;
                let id = user.id;
                trove.insert_user(user);
                id
            }
            _ if !results.rest_id.is_empty() => results.rest_id.parse()?,
            _ => continue,
        };
        if !participant_ids.contains(&id) {
            participant_ids.push(id);
        }
    }

    let ended_at = match metadata.ended_at.as_deref() {
        Some(raw) if !raw.is_empty() => {
            let ms = raw
                .parse::<i64>()
                .map_err(|e| decode_err(format!("space ended_at {raw:?}: {e}")))?;
            Some(parse_millis(ms)?)
        }
        _ => None,
    };

    trove.insert_space(Space {
        id: SpaceId::from(metadata.rest_id.as_str()),
        created_by_id,
        short_url: String::new(),
        state: metadata.state.clone(),
        title: metadata.title.clone(),
        created_at: metadata.created_at.map(parse_millis).transpose()?,
        started_at: metadata.started_at.map(parse_millis).transpose()?,
        ended_at,
        updated_at: metadata.updated_at.map(parse_millis).transpose()?,
        is_available_for_replay: metadata.is_space_available_for_replay,
        replay_watch_count: metadata.total_replay_watched,
        live_listeners_count: metadata.total_live_listeners,
        participant_ids,
        is_details_fetched: true,
    });
    Ok(trove)
}
