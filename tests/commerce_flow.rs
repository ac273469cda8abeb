use axum_market_api::{
    db::run_migrations,
    domain::{OrderStatus, PaymentMethod, PaymentStatus},
    dto::{
        cart::{AddToCartRequest, UpdateCartItemRequest},
        orders::{CheckoutRequest, OrderWithItems, UpdateOrderStatusRequest},
    },
    error::AppError,
    middleware::auth::AuthUser,
    models::ShippingAddress,
    routes::params::{OrderListQuery, Pagination},
    services::{admin_service, cart_service, order_service},
    state::AppState,
};
use tokio::sync::OnceCell;
use uuid::Uuid;

// Integration tests against a real database. Each test seeds its own users
// and products, so they are safe to run in parallel.
//
// Set TEST_DATABASE_URL or DATABASE_URL to run them; otherwise they skip.
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

async fn create_product(
    state: &AppState,
    price: i64,
    is_available: bool,
) -> anyhow::Result<Uuid> {
    let id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO products (id, name, description, price, is_available) VALUES ($1, $2, 'test product', $3, $4)",
    )
    .bind(id)
    .bind(format!("product-{id}"))
    .bind(price)
    .bind(is_available)
    .execute(&state.pool)
    .await?;
    Ok(id)
}

async fn set_price(state: &AppState, product_id: Uuid, price: i64) -> anyhow::Result<()> {
    sqlx::query("UPDATE products SET price = $1 WHERE id = $2")
        .bind(price)
        .bind(product_id)
        .execute(&state.pool)
        .await?;
    Ok(())
}

async fn set_available(
    state: &AppState,
    product_id: Uuid,
    is_available: bool,
) -> anyhow::Result<()> {
    sqlx::query("UPDATE products SET is_available = $1 WHERE id = $2")
        .bind(is_available)
        .bind(product_id)
        .execute(&state.pool)
        .await?;
    Ok(())
}

fn test_address() -> ShippingAddress {
    ShippingAddress {
        street: "1 Test Lane".into(),
        city: "Springfield".into(),
        state: "IL".into(),
        zip_code: "62701".into(),
        country: "US".into(),
    }
}

async fn checkout(
    state: &AppState,
    user: &AuthUser,
    method: PaymentMethod,
) -> anyhow::Result<OrderWithItems> {
    let resp = order_service::checkout(
        state,
        user,
        CheckoutRequest {
            shipping_address: test_address(),
            payment_method: Some(method),
            notes: None,
        },
    )
    .await?;
    Ok(resp.data.expect("checkout data"))
}

#[tokio::test]
async fn add_to_cart_accumulates_quantity_and_refreshes_snapshot() -> anyhow::Result<()> {
    let Some(state) = setup_state().await? else {
        return Ok(());
    };
    let user = create_user(&state, "user").await?;
    let product_id = create_product(&state, 1000, true).await?;

    cart_service::add_to_cart(
        &state,
        &user,
        AddToCartRequest {
            product_id,
            quantity: 2,
        },
    )
    .await?;

    set_price(&state, product_id, 1200).await?;

    let resp = cart_service::add_to_cart(
        &state,
        &user,
        AddToCartRequest {
            product_id,
            quantity: 3,
        },
    )
    .await?;
    let cart = resp.data.expect("cart data");

    assert_eq!(cart.items.len(), 1);
    assert_eq!(cart.items[0].quantity, 5);
    // Snapshot follows the price at the time of the second add.
    assert_eq!(cart.items[0].price_snapshot, 1200);
    Ok(())
}

#[tokio::test]
async fn checkout_rereads_prices_and_empties_cart() -> anyhow::Result<()> {
    let Some(state) = setup_state().await? else {
        return Ok(());
    };
    let user = create_user(&state, "user").await?;
    let product_id = create_product(&state, 1000, true).await?;

    cart_service::add_to_cart(
        &state,
        &user,
        AddToCartRequest {
            product_id,
            quantity: 3,
        },
    )
    .await?;

    // Price changes between add and checkout; the order must use the new price.
    set_price(&state, product_id, 1200).await?;

    let created = checkout(&state, &user, PaymentMethod::Cod).await?;
    assert_eq!(created.items.len(), 1);
    assert_eq!(created.items[0].price, 1200);
    assert_eq!(created.order.total_price, 3600);
    assert_eq!(created.order.status, OrderStatus::Pending);
    assert_eq!(created.order.payment_status, PaymentStatus::Pending);

    let cart = cart_service::get_cart(&state, &user).await?.data.unwrap();
    assert!(cart.items.is_empty(), "cart should be emptied by checkout");

    // A second checkout on the now-empty cart must be refused.
    let err = order_service::checkout(
        &state,
        &user,
        CheckoutRequest {
            shipping_address: test_address(),
            payment_method: None,
            notes: None,
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::InvalidState(_)));
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_adds_serialize_on_the_cart() -> anyhow::Result<()> {
    let Some(state) = setup_state().await? else {
        return Ok(());
    };
    let user = create_user(&state, "user").await?;
    let product_id = create_product(&state, 1000, true).await?;

    // Materialize the cart first so both adds contend on the same row lock.
    cart_service::get_cart(&state, &user).await?;

    let first = cart_service::add_to_cart(
        &state,
        &user,
        AddToCartRequest {
            product_id,
            quantity: 2,
        },
    );
    let second = cart_service::add_to_cart(
        &state,
        &user,
        AddToCartRequest {
            product_id,
            quantity: 3,
        },
    );
    let (first, second) = tokio::join!(first, second);
    first?;
    second?;

    // Neither increment may be lost, whichever add won the lock.
    let cart = cart_service::get_cart(&state, &user).await?.data.unwrap();
    assert_eq!(cart.items.len(), 1);
    assert_eq!(cart.items[0].quantity, 5);
    Ok(())
}

#[tokio::test]
async fn my_orders_list_newest_first() -> anyhow::Result<()> {
    let Some(state) = setup_state().await? else {
        return Ok(());
    };
    let user = create_user(&state, "user").await?;
    let product_id = create_product(&state, 600, true).await?;

    let mut order_ids = Vec::new();
    for quantity in [1, 2] {
        cart_service::add_to_cart(
            &state,
            &user,
            AddToCartRequest {
                product_id,
                quantity,
            },
        )
        .await?;
        let created = checkout(&state, &user, PaymentMethod::Cod).await?;
        order_ids.push(created.order.id);
    }

    let listed = order_service::list_my_orders(
        &state,
        &user,
        OrderListQuery {
            pagination: Pagination {
                page: None,
                per_page: None,
            },
            status: None,
            sort_order: None,
        },
    )
    .await?
    .data
    .unwrap();

    assert_eq!(listed.items.len(), 2);
    assert_eq!(listed.items[0].order.id, order_ids[1], "latest order first");
    assert_eq!(listed.items[1].order.id, order_ids[0]);
    Ok(())
}

#[tokio::test]
async fn unavailable_product_blocks_checkout_entirely() -> anyhow::Result<()> {
    let Some(state) = setup_state().await? else {
        return Ok(());
    };
    let user = create_user(&state, "user").await?;
    let available = create_product(&state, 500, true).await?;
    let withdrawn = create_product(&state, 700, true).await?;

    for product_id in [available, withdrawn] {
        cart_service::add_to_cart(
            &state,
            &user,
            AddToCartRequest {
                product_id,
                quantity: 1,
            },
        )
        .await?;
    }

    set_available(&state, withdrawn, false).await?;

    let err = order_service::checkout(
        &state,
        &user,
        CheckoutRequest {
            shipping_address: test_address(),
            payment_method: None,
            notes: None,
        },
    )
    .await
    .unwrap_err();
    match err {
        AppError::InvalidState(msg) => {
            assert!(
                msg.contains(&format!("product-{withdrawn}")),
                "error should name the unavailable product: {msg}"
            );
        }
        other => panic!("expected InvalidState, got {other:?}"),
    }

    // Nothing was created and the cart is untouched.
    let cart = cart_service::get_cart(&state, &user).await?.data.unwrap();
    assert_eq!(cart.items.len(), 2);
    Ok(())
}

#[tokio::test]
async fn missing_address_fields_are_rejected() -> anyhow::Result<()> {
    let Some(state) = setup_state().await? else {
        return Ok(());
    };
    let user = create_user(&state, "user").await?;
    let product_id = create_product(&state, 500, true).await?;
    cart_service::add_to_cart(
        &state,
        &user,
        AddToCartRequest {
            product_id,
            quantity: 1,
        },
    )
    .await?;

    let mut address = test_address();
    address.zip_code = "  ".into();
    let err = order_service::checkout(
        &state,
        &user,
        CheckoutRequest {
            shipping_address: address,
            payment_method: None,
            notes: None,
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));

    // Validation failures leave the cart untouched.
    let cart = cart_service::get_cart(&state, &user).await?.data.unwrap();
    assert_eq!(cart.items.len(), 1);
    Ok(())
}

#[tokio::test]
async fn removing_missing_item_is_a_noop() -> anyhow::Result<()> {
    let Some(state) = setup_state().await? else {
        return Ok(());
    };
    let user = create_user(&state, "user").await?;
    let product_id = create_product(&state, 900, true).await?;
    cart_service::add_to_cart(
        &state,
        &user,
        AddToCartRequest {
            product_id,
            quantity: 1,
        },
    )
    .await?;

    let resp = cart_service::remove_cart_item(&state, &user, Uuid::new_v4()).await?;
    let cart = resp.data.expect("cart data");
    assert_eq!(cart.items.len(), 1, "cart must be unchanged");

    // An update of a missing item is an error, unlike remove.
    let err = cart_service::update_cart_item(
        &state,
        &user,
        Uuid::new_v4(),
        UpdateCartItemRequest { quantity: 2 },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
    Ok(())
}

#[tokio::test]
async fn cart_operations_require_an_existing_cart() -> anyhow::Result<()> {
    let Some(state) = setup_state().await? else {
        return Ok(());
    };
    // Fresh user who never touched their cart.
    let user = create_user(&state, "user").await?;

    let err = cart_service::clear_cart(&state, &user).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));

    let err = cart_service::remove_cart_item(&state, &user, Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));

    // First read creates the empty aggregate.
    let cart = cart_service::get_cart(&state, &user).await?.data.unwrap();
    assert!(cart.items.is_empty());
    cart_service::clear_cart(&state, &user).await?;
    Ok(())
}

#[tokio::test]
async fn user_cancel_respects_status_guard() -> anyhow::Result<()> {
    let Some(state) = setup_state().await? else {
        return Ok(());
    };
    let user = create_user(&state, "user").await?;
    let admin = create_user(&state, "admin").await?;
    let product_id = create_product(&state, 1500, true).await?;

    cart_service::add_to_cart(
        &state,
        &user,
        AddToCartRequest {
            product_id,
            quantity: 1,
        },
    )
    .await?;
    let created = checkout(&state, &user, PaymentMethod::Card).await?;

    // Shipped orders cannot be cancelled by the owner.
    admin_service::update_order_status(
        &state,
        &admin,
        created.order.id,
        UpdateOrderStatusRequest {
            status: "shipped".into(),
        },
    )
    .await?;
    let err = order_service::cancel_order(&state, &user, created.order.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidState(_)));

    // A confirmed, paid order cancels into cancelled/refunded.
    cart_service::add_to_cart(
        &state,
        &user,
        AddToCartRequest {
            product_id,
            quantity: 1,
        },
    )
    .await?;
    let second = checkout(&state, &user, PaymentMethod::Card).await?;
    admin_service::update_order_status(
        &state,
        &admin,
        second.order.id,
        UpdateOrderStatusRequest {
            status: "confirmed".into(),
        },
    )
    .await?;
    sqlx::query("UPDATE orders SET payment_status = 'paid' WHERE id = $1")
        .bind(second.order.id)
        .execute(&state.pool)
        .await?;

    let cancelled = order_service::cancel_order(&state, &user, second.order.id)
        .await?
        .data
        .unwrap();
    assert_eq!(cancelled.order.status, OrderStatus::Cancelled);
    assert_eq!(cancelled.order.payment_status, PaymentStatus::Refunded);
    Ok(())
}

#[tokio::test]
async fn cod_delivery_marks_orders_paid() -> anyhow::Result<()> {
    let Some(state) = setup_state().await? else {
        return Ok(());
    };
    let user = create_user(&state, "user").await?;
    let admin = create_user(&state, "admin").await?;
    let product_id = create_product(&state, 800, true).await?;

    cart_service::add_to_cart(
        &state,
        &user,
        AddToCartRequest {
            product_id,
            quantity: 1,
        },
    )
    .await?;
    let cod_order = checkout(&state, &user, PaymentMethod::Cod).await?;

    let delivered = admin_service::update_order_status(
        &state,
        &admin,
        cod_order.order.id,
        UpdateOrderStatusRequest {
            status: "delivered".into(),
        },
    )
    .await?
    .data
    .unwrap();
    assert_eq!(delivered.status, OrderStatus::Delivered);
    assert_eq!(delivered.payment_status, PaymentStatus::Paid);

    // Card orders keep their payment status on delivery.
    cart_service::add_to_cart(
        &state,
        &user,
        AddToCartRequest {
            product_id,
            quantity: 1,
        },
    )
    .await?;
    let card_order = checkout(&state, &user, PaymentMethod::Card).await?;
    let delivered = admin_service::update_order_status(
        &state,
        &admin,
        card_order.order.id,
        UpdateOrderStatusRequest {
            status: "delivered".into(),
        },
    )
    .await?
    .data
    .unwrap();
    assert_eq!(delivered.payment_status, PaymentStatus::Pending);
    Ok(())
}

#[tokio::test]
async fn invalid_status_value_is_rejected_before_mutation() -> anyhow::Result<()> {
    let Some(state) = setup_state().await? else {
        return Ok(());
    };
    let user = create_user(&state, "user").await?;
    let admin = create_user(&state, "admin").await?;
    let product_id = create_product(&state, 800, true).await?;

    cart_service::add_to_cart(
        &state,
        &user,
        AddToCartRequest {
            product_id,
            quantity: 1,
        },
    )
    .await?;
    let created = checkout(&state, &user, PaymentMethod::Cod).await?;

    let err = admin_service::update_order_status(
        &state,
        &admin,
        created.order.id,
        UpdateOrderStatusRequest {
            status: "misplaced".into(),
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));

    let unchanged = order_service::get_order(&state, &user, created.order.id)
        .await?
        .data
        .unwrap();
    assert_eq!(unchanged.order.status, OrderStatus::Pending);
    Ok(())
}

#[tokio::test]
async fn orders_are_private_to_owner_and_admin() -> anyhow::Result<()> {
    let Some(state) = setup_state().await? else {
        return Ok(());
    };
    let owner = create_user(&state, "user").await?;
    let stranger = create_user(&state, "user").await?;
    let admin = create_user(&state, "admin").await?;
    let product_id = create_product(&state, 400, true).await?;

    cart_service::add_to_cart(
        &state,
        &owner,
        AddToCartRequest {
            product_id,
            quantity: 2,
        },
    )
    .await?;
    let created = checkout(&state, &owner, PaymentMethod::Upi).await?;

    let err = order_service::get_order(&state, &stranger, created.order.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));

    let err = order_service::cancel_order(&state, &stranger, created.order.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));

    // Admins can read any order, both directly and via the admin listing.
    let fetched = admin_service::get_order_admin(&state, &admin, created.order.id)
        .await?
        .data
        .unwrap();
    assert_eq!(fetched.order.user_id, owner.user_id);

    let err = admin_service::get_order_admin(&state, &stranger, created.order.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));
    Ok(())
}
