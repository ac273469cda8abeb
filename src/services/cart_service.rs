use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use crate::{
    audit::record_audit,
    dto::cart::{AddToCartRequest, UpdateCartItemRequest},
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::{Cart, CartItem, Product},
    response::{ApiResponse, Meta},
    state::AppState,
};

#[derive(FromRow)]
struct CartRow {
    id: Uuid,
    user_id: Uuid,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct CartItemRow {
    id: Uuid,
    product_id: Uuid,
    quantity: i32,
    price_snapshot: i64,
    name: Option<String>,
    description: Option<String>,
    price: Option<i64>,
    is_available: Option<bool>,
    vendor_id: Option<Uuid>,
    product_created_at: Option<DateTime<Utc>>,
}

/// Get the caller's cart, creating an empty one on first access.
pub async fn get_cart(state: &AppState, user: &AuthUser) -> AppResult<ApiResponse<Cart>> {
    sqlx::query("INSERT INTO carts (id, user_id) VALUES ($1, $2) ON CONFLICT (user_id) DO NOTHING")
        .bind(Uuid::new_v4())
        .bind(user.user_id)
        .execute(&state.pool)
        .await?;

    let row: CartRow = sqlx::query_as("SELECT * FROM carts WHERE user_id = $1")
        .bind(user.user_id)
        .fetch_one(&state.pool)
        .await?;

    let cart = load_cart(state, row).await?;
    Ok(ApiResponse::success("OK", cart, Some(Meta::empty())))
}

pub async fn add_to_cart(
    state: &AppState,
    user: &AuthUser,
    payload: AddToCartRequest,
) -> AppResult<ApiResponse<Cart>> {
    if payload.quantity < 1 {
        return Err(AppError::BadRequest("Quantity must be at least 1".into()));
    }

    let mut tx = state.pool.begin().await?;

    let product: Option<Product> = sqlx::query_as("SELECT * FROM products WHERE id = $1")
        .bind(payload.product_id)
        .fetch_optional(&mut *tx)
        .await?;
    let product = match product {
        Some(p) => p,
        None => return Err(AppError::NotFound("Product not found".into())),
    };
    if !product.is_available {
        return Err(AppError::Unavailable(format!(
            "\"{}\" is currently not available",
            product.name
        )));
    }

    sqlx::query("INSERT INTO carts (id, user_id) VALUES ($1, $2) ON CONFLICT (user_id) DO NOTHING")
        .bind(Uuid::new_v4())
        .bind(user.user_id)
        .execute(&mut *tx)
        .await?;

    // Serializes concurrent mutations of the same cart.
    let cart_row: CartRow = sqlx::query_as("SELECT * FROM carts WHERE user_id = $1 FOR UPDATE")
        .bind(user.user_id)
        .fetch_one(&mut *tx)
        .await?;

    // Accumulate quantity for an existing line; the stored price snapshot is
    // always refreshed to the product's current price.
    sqlx::query(
        r#"
        INSERT INTO cart_items (id, cart_id, product_id, quantity, price_snapshot)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (cart_id, product_id)
        DO UPDATE SET quantity = cart_items.quantity + EXCLUDED.quantity,
                      price_snapshot = EXCLUDED.price_snapshot
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(cart_row.id)
    .bind(product.id)
    .bind(payload.quantity)
    .bind(product.price)
    .execute(&mut *tx)
    .await?;

    touch_cart(&mut tx, cart_row.id).await?;
    tx.commit().await?;

    record_audit(
        &state.pool,
        Some(user.user_id),
        "cart_add",
        Some("cart_items"),
        Some(serde_json::json!({ "product_id": payload.product_id, "quantity": payload.quantity })),
    )
    .await;

    let cart_row: CartRow = sqlx::query_as("SELECT * FROM carts WHERE user_id = $1")
        .bind(user.user_id)
        .fetch_one(&state.pool)
        .await?;
    let cart = load_cart(state, cart_row).await?;
    Ok(ApiResponse::success("Added to cart", cart, Some(Meta::empty())))
}

pub async fn update_cart_item(
    state: &AppState,
    user: &AuthUser,
    item_id: Uuid,
    payload: UpdateCartItemRequest,
) -> AppResult<ApiResponse<Cart>> {
    if payload.quantity < 1 {
        return Err(AppError::BadRequest("Quantity must be at least 1".into()));
    }

    let mut tx = state.pool.begin().await?;
    let cart_row = lock_cart(&mut tx, user.user_id).await?;

    // Quantity updates neither re-check availability nor refresh the price.
    let result = sqlx::query("UPDATE cart_items SET quantity = $1 WHERE id = $2 AND cart_id = $3")
        .bind(payload.quantity)
        .bind(item_id)
        .bind(cart_row.id)
        .execute(&mut *tx)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Item not found in cart".into()));
    }

    touch_cart(&mut tx, cart_row.id).await?;
    tx.commit().await?;

    record_audit(
        &state.pool,
        Some(user.user_id),
        "cart_update",
        Some("cart_items"),
        Some(serde_json::json!({ "item_id": item_id, "quantity": payload.quantity })),
    )
    .await;

    let cart = reload_cart(state, user.user_id).await?;
    Ok(ApiResponse::success("Cart updated", cart, Some(Meta::empty())))
}

pub async fn remove_cart_item(
    state: &AppState,
    user: &AuthUser,
    item_id: Uuid,
) -> AppResult<ApiResponse<Cart>> {
    let mut tx = state.pool.begin().await?;
    let cart_row = lock_cart(&mut tx, user.user_id).await?;

    // Removing an id that is not in the cart is a no-op; the desired end
    // state (item absent) already holds.
    sqlx::query("DELETE FROM cart_items WHERE id = $1 AND cart_id = $2")
        .bind(item_id)
        .bind(cart_row.id)
        .execute(&mut *tx)
        .await?;

    touch_cart(&mut tx, cart_row.id).await?;
    tx.commit().await?;

    record_audit(
        &state.pool,
        Some(user.user_id),
        "cart_remove",
        Some("cart_items"),
        Some(serde_json::json!({ "item_id": item_id })),
    )
    .await;

    let cart = reload_cart(state, user.user_id).await?;
    Ok(ApiResponse::success("Removed from cart", cart, Some(Meta::empty())))
}

/// Empty the cart in place. The cart row itself is retained so that the next
/// add does not race on re-creating it.
pub async fn clear_cart(state: &AppState, user: &AuthUser) -> AppResult<ApiResponse<Cart>> {
    let mut tx = state.pool.begin().await?;
    let cart_row = lock_cart(&mut tx, user.user_id).await?;

    sqlx::query("DELETE FROM cart_items WHERE cart_id = $1")
        .bind(cart_row.id)
        .execute(&mut *tx)
        .await?;

    touch_cart(&mut tx, cart_row.id).await?;
    tx.commit().await?;

    record_audit(
        &state.pool,
        Some(user.user_id),
        "cart_clear",
        Some("cart_items"),
        None,
    )
    .await;

    let cart = reload_cart(state, user.user_id).await?;
    Ok(ApiResponse::success("Cart cleared", cart, Some(Meta::empty())))
}

async fn lock_cart(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    user_id: Uuid,
) -> AppResult<CartRow> {
    let row: Option<CartRow> = sqlx::query_as("SELECT * FROM carts WHERE user_id = $1 FOR UPDATE")
        .bind(user_id)
        .fetch_optional(&mut **tx)
        .await?;
    row.ok_or_else(|| AppError::NotFound("Cart not found".into()))
}

async fn touch_cart(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    cart_id: Uuid,
) -> AppResult<()> {
    sqlx::query("UPDATE carts SET updated_at = now() WHERE id = $1")
        .bind(cart_id)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

async fn reload_cart(state: &AppState, user_id: Uuid) -> AppResult<Cart> {
    let row: CartRow = sqlx::query_as("SELECT * FROM carts WHERE user_id = $1")
        .bind(user_id)
        .fetch_one(&state.pool)
        .await?;
    load_cart(state, row).await
}

async fn load_cart(state: &AppState, row: CartRow) -> AppResult<Cart> {
    let items = sqlx::query_as::<_, CartItemRow>(
        r#"
        SELECT ci.id, ci.product_id, ci.quantity, ci.price_snapshot,
               p.name, p.description, p.price, p.is_available, p.vendor_id,
               p.created_at AS product_created_at
        FROM cart_items ci
        LEFT JOIN products p ON p.id = ci.product_id
        WHERE ci.cart_id = $1
        ORDER BY ci.created_at ASC
        "#,
    )
    .bind(row.id)
    .fetch_all(&state.pool)
    .await?;

    let items = items
        .into_iter()
        .map(|item| {
            let product = match (item.name, item.price, item.is_available, item.product_created_at)
            {
                (Some(name), Some(price), Some(is_available), Some(created_at)) => Some(Product {
                    id: item.product_id,
                    vendor_id: item.vendor_id,
                    name,
                    description: item.description,
                    price,
                    is_available,
                    created_at,
                }),
                _ => None,
            };
            CartItem {
                id: item.id,
                product_id: item.product_id,
                quantity: item.quantity,
                price_snapshot: item.price_snapshot,
                product,
            }
        })
        .collect();

    Ok(Cart {
        id: row.id,
        user_id: row.user_id,
        items,
        created_at: row.created_at,
        updated_at: row.updated_at,
    })
}
