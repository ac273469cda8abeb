use std::collections::HashMap;

use chrono::Utc;
use sea_orm::ActiveValue::NotSet;
use sea_orm::sea_query::LockType;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, TransactionTrait,
};
use uuid::Uuid;

use crate::{
    audit::record_audit,
    domain::EventStatus,
    dto::events::{CreateEventRequest, EventList, UpdateEventRequest},
    entity::{
        event_attendees::{
            ActiveModel as AttendeeActive, Column as AttendeeCol, Entity as EventAttendees,
        },
        events::{ActiveModel as EventActive, Column as EventCol, Entity as Events, Model as EventModel},
    },
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::Event,
    response::{ApiResponse, Meta},
    routes::params::EventListQuery,
    state::AppState,
};

const VALID_CATEGORIES: [&str; 6] = [
    "conference",
    "workshop",
    "seminar",
    "meetup",
    "webinar",
    "other",
];

/// List events ordered by date, soonest first.
pub async fn list_events(
    state: &AppState,
    query: EventListQuery,
) -> AppResult<ApiResponse<EventList>> {
    let (page, limit, offset) = query.pagination.normalize();

    let mut condition = Condition::all();
    if let Some(status) = query.status.as_deref().filter(|s| !s.is_empty()) {
        let status = EventStatus::parse(status)
            .ok_or_else(|| AppError::BadRequest(invalid_event_status_message()))?;
        condition = condition.add(EventCol::Status.eq(status.as_str()));
    }
    if let Some(category) = query.category.as_ref().filter(|c| !c.is_empty()) {
        condition = condition.add(EventCol::Category.eq(category.clone()));
    }

    let finder = Events::find()
        .filter(condition)
        .order_by_asc(EventCol::Date);

    let total = finder.clone().count(&state.orm).await? as i64;

    let events = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?;

    let ids: Vec<Uuid> = events.iter().map(|e| e.id).collect();
    let mut counts: HashMap<Uuid, i64> = HashMap::new();
    if !ids.is_empty() {
        let rows: Vec<(Uuid, i64)> = EventAttendees::find()
            .select_only()
            .column(AttendeeCol::EventId)
            .column_as(AttendeeCol::Id.count(), "attendee_count")
            .filter(AttendeeCol::EventId.is_in(ids))
            .group_by(AttendeeCol::EventId)
            .into_tuple()
            .all(&state.orm)
            .await?;
        counts.extend(rows);
    }

    let items = events
        .into_iter()
        .map(|model| {
            let attendee_count = counts.get(&model.id).copied().unwrap_or(0);
            event_from_entity(model, attendee_count)
        })
        .collect::<AppResult<Vec<_>>>()?;

    let meta = Meta::new(page, limit, total);
    Ok(ApiResponse::success("Events", EventList { items }, Some(meta)))
}

pub async fn get_event(state: &AppState, id: Uuid) -> AppResult<ApiResponse<Event>> {
    let event = Events::find_by_id(id).one(&state.orm).await?;
    let event = match event {
        Some(e) => e,
        None => return Err(AppError::NotFound("Event not found".into())),
    };

    let attendee_count = EventAttendees::find()
        .filter(AttendeeCol::EventId.eq(event.id))
        .count(&state.orm)
        .await? as i64;

    Ok(ApiResponse::success(
        "Event",
        event_from_entity(event, attendee_count)?,
        None,
    ))
}

/// Create an event; the caller becomes its organizer.
pub async fn create_event(
    state: &AppState,
    user: &AuthUser,
    payload: CreateEventRequest,
) -> AppResult<ApiResponse<Event>> {
    if payload.title.trim().is_empty() {
        return Err(AppError::BadRequest("Event title is required".into()));
    }
    if payload.description.trim().is_empty() {
        return Err(AppError::BadRequest("Event description is required".into()));
    }
    if payload.location.trim().is_empty() {
        return Err(AppError::BadRequest("Event location is required".into()));
    }
    if payload.capacity < 0 {
        return Err(AppError::BadRequest("Capacity must not be negative".into()));
    }
    let category = validate_category(payload.category)?;

    let active = EventActive {
        id: Set(Uuid::new_v4()),
        organizer_id: Set(user.user_id),
        title: Set(payload.title),
        description: Set(payload.description),
        date: Set(payload.date.into()),
        location: Set(payload.location),
        category: Set(category),
        capacity: Set(payload.capacity),
        status: Set(EventStatus::Upcoming.as_str().to_string()),
        created_at: NotSet,
        updated_at: NotSet,
    };
    let event = active.insert(&state.orm).await?;

    record_audit(
        &state.pool,
        Some(user.user_id),
        "event_create",
        Some("events"),
        Some(serde_json::json!({ "event_id": event.id })),
    )
    .await;

    Ok(ApiResponse::success(
        "Event created",
        event_from_entity(event, 0)?,
        Some(Meta::empty()),
    ))
}

pub async fn update_event(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateEventRequest,
) -> AppResult<ApiResponse<Event>> {
    let existing = Events::find_by_id(id).one(&state.orm).await?;
    let existing = match existing {
        Some(e) => e,
        None => return Err(AppError::NotFound("Event not found".into())),
    };
    ensure_organizer_or_admin(user, &existing)?;

    if let Some(capacity) = payload.capacity {
        if capacity < 0 {
            return Err(AppError::BadRequest("Capacity must not be negative".into()));
        }
    }

    let mut active: EventActive = existing.into();
    if let Some(title) = payload.title {
        if title.trim().is_empty() {
            return Err(AppError::BadRequest("Event title is required".into()));
        }
        active.title = Set(title);
    }
    if let Some(description) = payload.description {
        active.description = Set(description);
    }
    if let Some(date) = payload.date {
        active.date = Set(date.into());
    }
    if let Some(location) = payload.location {
        if location.trim().is_empty() {
            return Err(AppError::BadRequest("Event location is required".into()));
        }
        active.location = Set(location);
    }
    if payload.category.is_some() {
        active.category = Set(validate_category(payload.category)?);
    }
    if let Some(capacity) = payload.capacity {
        active.capacity = Set(capacity);
    }
    if let Some(status) = payload.status {
        let status = EventStatus::parse(&status)
            .ok_or_else(|| AppError::BadRequest(invalid_event_status_message()))?;
        active.status = Set(status.as_str().to_string());
    }
    active.updated_at = Set(Utc::now().into());

    let event = active.update(&state.orm).await?;

    record_audit(
        &state.pool,
        Some(user.user_id),
        "event_update",
        Some("events"),
        Some(serde_json::json!({ "event_id": event.id })),
    )
    .await;

    let attendee_count = EventAttendees::find()
        .filter(AttendeeCol::EventId.eq(event.id))
        .count(&state.orm)
        .await? as i64;

    Ok(ApiResponse::success(
        "Event updated",
        event_from_entity(event, attendee_count)?,
        Some(Meta::empty()),
    ))
}

/// Delete an event with its attendee rows.
pub async fn delete_event(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<Event>> {
    let existing = Events::find_by_id(id).one(&state.orm).await?;
    let existing = match existing {
        Some(e) => e,
        None => return Err(AppError::NotFound("Event not found".into())),
    };
    ensure_organizer_or_admin(user, &existing)?;

    Events::delete_by_id(existing.id).exec(&state.orm).await?;

    record_audit(
        &state.pool,
        Some(user.user_id),
        "event_delete",
        Some("events"),
        Some(serde_json::json!({ "event_id": existing.id })),
    )
    .await;

    Ok(ApiResponse::success(
        "Event deleted",
        event_from_entity(existing, 0)?,
        Some(Meta::empty()),
    ))
}

/// Register the caller as an attendee.
///
/// The event row is locked for the duration so that the seat check and the
/// attendee insert cannot interleave with a concurrent registration.
pub async fn register_for_event(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<Event>> {
    let txn = state.orm.begin().await?;

    let event = Events::find_by_id(id)
        .lock(LockType::Update)
        .one(&txn)
        .await?;
    let event = match event {
        Some(e) => e,
        None => return Err(AppError::NotFound("Event not found".into())),
    };

    let status = parse_event_status(&event)?;
    if !status.accepts_registrations() {
        return Err(AppError::InvalidState(format!(
            "Registration is closed for {} events",
            status
        )));
    }

    let already = EventAttendees::find()
        .filter(AttendeeCol::EventId.eq(event.id))
        .filter(AttendeeCol::UserId.eq(user.user_id))
        .one(&txn)
        .await?;
    if already.is_some() {
        return Err(AppError::InvalidState(
            "Already registered for this event".into(),
        ));
    }

    let attendee_count = EventAttendees::find()
        .filter(AttendeeCol::EventId.eq(event.id))
        .count(&txn)
        .await? as i64;
    if event.capacity > 0 && attendee_count >= event.capacity as i64 {
        return Err(AppError::InvalidState("Event is full".into()));
    }

    AttendeeActive {
        id: Set(Uuid::new_v4()),
        event_id: Set(event.id),
        user_id: Set(user.user_id),
        created_at: NotSet,
    }
    .insert(&txn)
    .await?;

    txn.commit().await?;

    record_audit(
        &state.pool,
        Some(user.user_id),
        "event_register",
        Some("event_attendees"),
        Some(serde_json::json!({ "event_id": event.id })),
    )
    .await;

    Ok(ApiResponse::success(
        "Registered for event",
        event_from_entity(event, attendee_count + 1)?,
        Some(Meta::empty()),
    ))
}

fn ensure_organizer_or_admin(user: &AuthUser, event: &EventModel) -> AppResult<()> {
    if !user.is_admin() && event.organizer_id != user.user_id {
        return Err(AppError::Forbidden(
            "Not authorized to modify this event".into(),
        ));
    }
    Ok(())
}

fn validate_category(category: Option<String>) -> AppResult<String> {
    match category {
        None => Ok("other".to_string()),
        Some(c) => {
            if !VALID_CATEGORIES.contains(&c.as_str()) {
                return Err(AppError::BadRequest(format!(
                    "Invalid category. Must be one of: {}",
                    VALID_CATEGORIES.join(", ")
                )));
            }
            Ok(c)
        }
    }
}

fn invalid_event_status_message() -> String {
    let valid: Vec<&str> = EventStatus::ALL.iter().map(|s| s.as_str()).collect();
    format!("Invalid status. Must be one of: {}", valid.join(", "))
}

fn parse_event_status(event: &EventModel) -> AppResult<EventStatus> {
    EventStatus::parse(&event.status)
        .ok_or_else(|| anyhow::anyhow!("stored event status is invalid: {}", event.status).into())
}

fn event_from_entity(model: EventModel, attendee_count: i64) -> AppResult<Event> {
    let status = parse_event_status(&model)?;
    let available_seats = if model.capacity > 0 {
        Some(model.capacity as i64 - attendee_count)
    } else {
        None
    };
    Ok(Event {
        id: model.id,
        organizer_id: model.organizer_id,
        title: model.title,
        description: model.description,
        date: model.date.with_timezone(&Utc),
        location: model.location,
        category: model.category,
        capacity: model.capacity,
        status,
        attendee_count,
        available_seats,
        created_at: model.created_at.with_timezone(&Utc),
        updated_at: model.updated_at.with_timezone(&Utc),
    })
}
