use axum_market_api::{
    db::run_migrations,
    domain::EventStatus,
    dto::events::{CreateEventRequest, UpdateEventRequest},
    error::AppError,
    middleware::auth::AuthUser,
    models::Event,
    routes::params::{EventListQuery, Pagination},
    services::event_service,
    state::AppState,
};
use chrono::{DateTime, Duration, Utc};
use tokio::sync::OnceCell;
use uuid::Uuid;

// Set TEST_DATABASE_URL or DATABASE_URL to run these; otherwise they skip.
static MIGRATIONS: OnceCell<()> = OnceCell::const_new();

async fn setup_state() -> anyhow::Result<Option<AppState>> {
    let database_url =
        match std::env::var("TEST_DATABASE_URL").or_else(|_| std::env::var("DATABASE_URL")) {
            Ok(url) => url,
            Err(_) => {
                eprintln!(
                    "Skipping test: set TEST_DATABASE_URL or DATABASE_URL to run integration tests."
                );
                return Ok(None);
            }
        };

    let state = AppState::connect(&database_url).await?;
    MIGRATIONS
        .get_or_try_init(|| async {
            run_migrations(&state.orm).await?;
            Ok::<(), anyhow::Error>(())
        })
        .await?;

    Ok(Some(state))
}

async fn create_user(state: &AppState, role: &str) -> anyhow::Result<AuthUser> {
    let id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO users (id, email, password_hash, name, role) VALUES ($1, $2, 'dummy', $3, $4)",
    )
    .bind(id)
    .bind(format!("{id}@example.com"))
    .bind(format!("test-{role}"))
    .bind(role)
    .execute(&state.pool)
    .await?;

    Ok(AuthUser {
        user_id: id,
        role: role.to_string(),
    })
}

async fn create_event(
    state: &AppState,
    organizer: &AuthUser,
    capacity: i32,
    date: DateTime<Utc>,
) -> anyhow::Result<Event> {
    let resp = event_service::create_event(
        state,
        organizer,
        CreateEventRequest {
            title: format!("event-{}", Uuid::new_v4()),
            description: "test event".into(),
            date,
            location: "Hall A".into(),
            category: Some("meetup".into()),
            capacity,
        },
    )
    .await?;
    Ok(resp.data.expect("event data"))
}

fn empty_update() -> UpdateEventRequest {
    UpdateEventRequest {
        title: None,
        description: None,
        date: None,
        location: None,
        category: None,
        capacity: None,
        status: None,
    }
}

#[tokio::test]
async fn registration_stops_at_capacity_and_rejects_duplicates() -> anyhow::Result<()> {
    let Some(state) = setup_state().await? else {
        return Ok(());
    };
    let organizer = create_user(&state, "user").await?;
    let attendee = create_user(&state, "user").await?;
    let latecomer = create_user(&state, "user").await?;
    let event = create_event(&state, &organizer, 1, Utc::now() + Duration::days(7)).await?;

    assert_eq!(event.status, EventStatus::Upcoming);
    assert_eq!(event.attendee_count, 0);
    assert_eq!(event.available_seats, Some(1));

    let registered = event_service::register_for_event(&state, &attendee, event.id)
        .await?
        .data
        .unwrap();
    assert_eq!(registered.attendee_count, 1);
    assert_eq!(registered.available_seats, Some(0));

    let err = event_service::register_for_event(&state, &latecomer, event.id)
        .await
        .unwrap_err();
    match err {
        AppError::InvalidState(msg) => assert!(msg.contains("full"), "unexpected message: {msg}"),
        other => panic!("expected InvalidState, got {other:?}"),
    }

    // Registering twice is refused even while seats remain elsewhere.
    let err = event_service::register_for_event(&state, &attendee, event.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidState(_)));
    Ok(())
}

#[tokio::test]
async fn zero_capacity_means_unlimited_seats() -> anyhow::Result<()> {
    let Some(state) = setup_state().await? else {
        return Ok(());
    };
    let organizer = create_user(&state, "user").await?;
    let event = create_event(&state, &organizer, 0, Utc::now() + Duration::days(7)).await?;
    assert_eq!(event.available_seats, None);

    for _ in 0..3 {
        let attendee = create_user(&state, "user").await?;
        event_service::register_for_event(&state, &attendee, event.id).await?;
    }

    let fetched = event_service::get_event(&state, event.id).await?.data.unwrap();
    assert_eq!(fetched.attendee_count, 3);
    assert_eq!(fetched.available_seats, None);
    Ok(())
}

#[tokio::test]
async fn registration_closes_with_the_event() -> anyhow::Result<()> {
    let Some(state) = setup_state().await? else {
        return Ok(());
    };
    let organizer = create_user(&state, "user").await?;
    let attendee = create_user(&state, "user").await?;
    let event = create_event(&state, &organizer, 0, Utc::now() + Duration::days(7)).await?;

    event_service::update_event(
        &state,
        &organizer,
        event.id,
        UpdateEventRequest {
            status: Some("cancelled".into()),
            ..empty_update()
        },
    )
    .await?;

    let err = event_service::register_for_event(&state, &attendee, event.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidState(_)));

    // Reopening the event makes registration possible again.
    event_service::update_event(
        &state,
        &organizer,
        event.id,
        UpdateEventRequest {
            status: Some("ongoing".into()),
            ..empty_update()
        },
    )
    .await?;
    event_service::register_for_event(&state, &attendee, event.id).await?;
    Ok(())
}

#[tokio::test]
async fn events_list_soonest_first() -> anyhow::Result<()> {
    let Some(state) = setup_state().await? else {
        return Ok(());
    };
    let organizer = create_user(&state, "user").await?;
    let later = create_event(&state, &organizer, 0, Utc::now() + Duration::days(60)).await?;
    let sooner = create_event(&state, &organizer, 0, Utc::now() + Duration::days(14)).await?;

    let listed = event_service::list_events(
        &state,
        EventListQuery {
            pagination: Pagination {
                page: None,
                per_page: Some(100),
            },
            status: Some("upcoming".into()),
            category: None,
        },
    )
    .await?
    .data
    .unwrap();

    let position = |id: Uuid| listed.items.iter().position(|e| e.id == id);
    let sooner_pos = position(sooner.id).expect("sooner event listed");
    let later_pos = position(later.id).expect("later event listed");
    assert!(sooner_pos < later_pos, "events must be ordered by date");
    Ok(())
}

#[tokio::test]
async fn only_the_organizer_or_an_admin_may_modify_an_event() -> anyhow::Result<()> {
    let Some(state) = setup_state().await? else {
        return Ok(());
    };
    let organizer = create_user(&state, "user").await?;
    let stranger = create_user(&state, "user").await?;
    let admin = create_user(&state, "admin").await?;
    let event = create_event(&state, &organizer, 0, Utc::now() + Duration::days(7)).await?;

    let err = event_service::update_event(
        &state,
        &stranger,
        event.id,
        UpdateEventRequest {
            title: Some("hijacked".into()),
            ..empty_update()
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));

    let err = event_service::delete_event(&state, &stranger, event.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));

    let updated = event_service::update_event(
        &state,
        &admin,
        event.id,
        UpdateEventRequest {
            location: Some("Hall B".into()),
            ..empty_update()
        },
    )
    .await?
    .data
    .unwrap();
    assert_eq!(updated.location, "Hall B");

    event_service::delete_event(&state, &admin, event.id).await?;
    let err = event_service::get_event(&state, event.id).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
    Ok(())
}

#[tokio::test]
async fn event_fields_are_validated() -> anyhow::Result<()> {
    let Some(state) = setup_state().await? else {
        return Ok(());
    };
    let organizer = create_user(&state, "user").await?;

    let err = event_service::create_event(
        &state,
        &organizer,
        CreateEventRequest {
            title: "  ".into(),
            description: "d".into(),
            date: Utc::now(),
            location: "somewhere".into(),
            category: None,
            capacity: 0,
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));

    let err = event_service::create_event(
        &state,
        &organizer,
        CreateEventRequest {
            title: "valid".into(),
            description: "d".into(),
            date: Utc::now(),
            location: "somewhere".into(),
            category: Some("circus".into()),
            capacity: 0,
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));

    // Omitted category defaults to "other".
    let event = event_service::create_event(
        &state,
        &organizer,
        CreateEventRequest {
            title: format!("event-{}", Uuid::new_v4()),
            description: "d".into(),
            date: Utc::now() + Duration::days(1),
            location: "somewhere".into(),
            category: None,
            capacity: 0,
        },
    )
    .await?
    .data
    .unwrap();
    assert_eq!(event.category, "other");

    let err = event_service::update_event(
        &state,
        &organizer,
        event.id,
        UpdateEventRequest {
            status: Some("postponed".into()),
            ..empty_update()
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));
    Ok(())
}
