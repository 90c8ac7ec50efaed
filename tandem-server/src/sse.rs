use std::convert::Infallible;

use axum::{
    extract::Query,
    response::{
        sse::{Event, KeepAlive},
        Sse,
    },
    routing::get,
};
use futures_util::{Stream, StreamExt};
use log::{debug, warn};
use serde::Serialize;
use tandem_collab::CollabEvent;
use utoipa::ToSchema;

use crate::{
    auth::Session,
    context::ServerContext,
    errors::{ErrorBody, ServerResult},
    schemas::EventsQuery,
    serialized::{Playback, ToSerialized},
    Router,
};

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RoomMembers {
    room_id: String,
    /// Member ids in join order
    members: Vec<String>,
}

/// The payload of an event. The kind of event is sent as the event name.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(untagged)]
pub enum ServerEvent {
    /// `membersUpdated`: users joined or left a room
    MembersUpdated(RoomMembers),
    /// `playback:update`: the owner of a room changed what is playing
    PlaybackUpdate(Playback),
    /// `onlineUsersChanged`: the ids of every user with an open event stream
    OnlineUsersChanged(Vec<String>),
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::MembersUpdated(_) => "membersUpdated",
            Self::PlaybackUpdate(_) => "playback:update",
            Self::OnlineUsersChanged(_) => "onlineUsersChanged",
        }
    }

    fn to_event(&self) -> Event {
        Event::default()
            .event(self.name())
            .json_data(self)
            .unwrap_or_else(|e| {
                warn!("Could not serialize {} event: {}", self.name(), e);
                Event::default().comment("dropped event")
            })
    }
}

impl From<CollabEvent> for ServerEvent {
    fn from(value: CollabEvent) -> Self {
        match value {
            CollabEvent::MembersUpdated { room_id, members } => {
                Self::MembersUpdated(RoomMembers { room_id, members })
            }
            CollabEvent::PlaybackUpdate { playback, .. } => {
                Self::PlaybackUpdate(playback.to_serialized())
            }
            CollabEvent::OnlineUsersChanged { users } => Self::OnlineUsersChanged(users),
        }
    }
}

#[utoipa::path(
    get,
    path = "/v1/events",
    tag = "events",
    params(EventsQuery),
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (
            status = 200,
            content_type = "text/event-stream",
            description = "A stream of events of the given rooms, and presence changes",
            body = ServerEvent
        ),
        (status = 404, body = ErrorBody, description = "One of the rooms doesn't exist")
    )
)]
async fn event_stream(
    session: Session,
    context: ServerContext,
    Query(query): Query<EventsQuery>,
) -> ServerResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let room_ids = query.room_ids();

    for room_id in &room_ids {
        context.collab.rooms.room_by_id(room_id).await?;
    }

    let bus = context.collab.bus();
    let subscription = bus.connect();

    for room_id in &room_ids {
        bus.subscribe(room_id, subscription.id());
    }

    bus.set_online(&session.user().id, subscription.id());

    debug!(
        "{} opened event stream {} for rooms {:?}",
        session.user().id,
        subscription.id(),
        room_ids
    );

    // Dropping the subscription with the response takes the user offline
    let stream = subscription.map(|event| Ok(ServerEvent::from(event).to_event()));

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

pub fn router() -> Router {
    Router::new().route("/", get(event_stream))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tandem_collab::{EffectivePlayback, PlaybackAction};

    #[test]
    fn members_payload_is_camel_case() {
        let event = ServerEvent::from(CollabEvent::MembersUpdated {
            room_id: "r1".into(),
            members: vec!["u1".into(), "u2".into()],
        });

        assert_eq!(event.name(), "membersUpdated");
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            serde_json::json!({ "roomId": "r1", "members": ["u1", "u2"] })
        );
    }

    #[test]
    fn playback_payload_has_exact_fields() {
        let event = ServerEvent::from(CollabEvent::PlaybackUpdate {
            room_id: "r1".into(),
            playback: EffectivePlayback {
                track_uri: "spotify:track:1".into(),
                track_name: "Song".into(),
                artist_name: "Band".into(),
                position_ms: 1000,
                action: PlaybackAction::Playing,
                started_at: Utc::now(),
                initiated_by: "u1".into(),
            },
        });

        let value = serde_json::to_value(&event).unwrap();
        let mut fields: Vec<_> = value.as_object().unwrap().keys().cloned().collect();
        fields.sort();

        assert_eq!(event.name(), "playback:update");
        assert_eq!(
            fields,
            vec![
                "action",
                "artistName",
                "initiatedBy",
                "positionMs",
                "startedAt",
                "trackName",
                "trackUri"
            ]
        );
        assert_eq!(value["action"], "playing");
    }

    #[test]
    fn online_users_payload_is_a_list() {
        let event = ServerEvent::from(CollabEvent::OnlineUsersChanged {
            users: vec!["u1".into()],
        });

        assert_eq!(serde_json::to_value(&event).unwrap(), serde_json::json!(["u1"]));
    }
}
