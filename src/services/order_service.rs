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
    domain::{self, Actor, OrderStatus, PaymentMethod, PaymentStatus, TransitionError},
    dto::orders::{CheckoutRequest, OrderList, OrderWithItems},
    entity::{
        cart_items::{Column as CartItemCol, Entity as CartItems},
        carts::{ActiveModel as CartActive, Column as CartCol, Entity as Carts},
        order_items::{
            ActiveModel as OrderItemActive, Column as OrderItemCol, Entity as OrderItems,
            Model as OrderItemModel,
        },
        orders::{ActiveModel as OrderActive, Column as OrderCol, Entity as Orders, Model as OrderModel},
        products::Entity as Products,
    },
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::{Order, OrderItem, ShippingAddress},
    response::{ApiResponse, Meta},
    routes::params::{OrderListQuery, SortOrder},
    state::AppState,
};

/// Convert the caller's cart into an immutable order.
///
/// The whole read-validate-create-clear sequence runs in one transaction
/// holding the cart row lock, so no cart mutation can interleave between the
/// availability check and the cart clear.
pub async fn checkout(
    state: &AppState,
    user: &AuthUser,
    payload: CheckoutRequest,
) -> AppResult<ApiResponse<OrderWithItems>> {
    let address = validate_address(payload.shipping_address)?;
    let payment_method = payload.payment_method.unwrap_or(PaymentMethod::Cod);
    let notes = payload.notes.unwrap_or_default();

    let txn = state.orm.begin().await?;

    let cart = Carts::find()
        .filter(CartCol::UserId.eq(user.user_id))
        .lock(LockType::Update)
        .one(&txn)
        .await?;
    let cart = match cart {
        Some(c) => c,
        None => {
            return Err(AppError::InvalidState(
                "Cart is empty. Add items before checkout.".into(),
            ));
        }
    };

    let lines = CartItems::find()
        .filter(CartItemCol::CartId.eq(cart.id))
        .order_by_asc(CartItemCol::CreatedAt)
        .all(&txn)
        .await?;
    if lines.is_empty() {
        return Err(AppError::InvalidState(
            "Cart is empty. Add items before checkout.".into(),
        ));
    }

    // Re-validate every line against the catalog. Prices are re-read here;
    // the cart's stored snapshot is display-only.
    let mut order_lines = Vec::with_capacity(lines.len());
    for line in &lines {
        let product = Products::find_by_id(line.product_id).one(&txn).await?;
        let product = match product {
            Some(p) => p,
            None => {
                return Err(AppError::InvalidState(
                    "One or more products in your cart are no longer available".into(),
                ));
            }
        };
        if !product.is_available {
            return Err(AppError::InvalidState(format!(
                "\"{}\" is no longer available",
                product.name
            )));
        }
        order_lines.push((product.id, product.name, line.quantity, product.price));
    }

    let total_price: i64 = order_lines
        .iter()
        .map(|(_, _, quantity, price)| price * (*quantity as i64))
        .sum();

    let order = OrderActive {
        id: Set(Uuid::new_v4()),
        user_id: Set(user.user_id),
        total_price: Set(total_price),
        status: Set(OrderStatus::Pending.as_str().to_string()),
        payment_status: Set(PaymentStatus::Pending.as_str().to_string()),
        payment_method: Set(payment_method.as_str().to_string()),
        ship_street: Set(address.street.clone()),
        ship_city: Set(address.city.clone()),
        ship_state: Set(address.state.clone()),
        ship_zip_code: Set(address.zip_code.clone()),
        ship_country: Set(address.country.clone()),
        notes: Set(notes),
        created_at: NotSet,
        updated_at: NotSet,
    }
    .insert(&txn)
    .await?;

    let mut items = Vec::with_capacity(order_lines.len());
    for (product_id, name, quantity, price) in order_lines {
        let item = OrderItemActive {
            id: Set(Uuid::new_v4()),
            order_id: Set(order.id),
            product_id: Set(product_id),
            name: Set(name),
            quantity: Set(quantity),
            price: Set(price),
            created_at: NotSet,
        }
        .insert(&txn)
        .await?;
        items.push(order_item_from_entity(item));
    }

    // Empty the cart; the cart row itself survives.
    CartItems::delete_many()
        .filter(CartItemCol::CartId.eq(cart.id))
        .exec(&txn)
        .await?;
    let mut cart_active: CartActive = cart.into();
    cart_active.updated_at = Set(Utc::now().into());
    cart_active.update(&txn).await?;

    txn.commit().await?;

    record_audit(
        &state.pool,
        Some(user.user_id),
        "checkout",
        Some("orders"),
        Some(serde_json::json!({ "order_id": order.id, "total_price": total_price })),
    )
    .await;

    let order = order_from_entity(order)?;
    Ok(ApiResponse::success(
        "Order created",
        OrderWithItems { order, items },
        Some(Meta::empty()),
    ))
}

pub async fn list_my_orders(
    state: &AppState,
    user: &AuthUser,
    query: OrderListQuery,
) -> AppResult<ApiResponse<OrderList>> {
    let (page, limit, offset) = query.pagination.normalize();
    let mut condition = Condition::all().add(OrderCol::UserId.eq(user.user_id));
    if let Some(status) = parse_status_filter(query.status.as_deref())? {
        condition = condition.add(OrderCol::Status.eq(status.as_str()));
    }

    let sort_order = query.sort_order.unwrap_or(SortOrder::Desc);
    let mut finder = Orders::find().filter(condition);
    finder = match sort_order {
        SortOrder::Asc => finder.order_by_asc(OrderCol::CreatedAt),
        SortOrder::Desc => finder.order_by_desc(OrderCol::CreatedAt),
    };

    let total = finder.clone().count(&state.orm).await? as i64;

    let orders = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?;

    let items = attach_items(state, orders).await?;
    let meta = Meta::new(page, limit, total);
    Ok(ApiResponse::success("OK", OrderList { items }, Some(meta)))
}

pub async fn get_order(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<OrderWithItems>> {
    let order = Orders::find_by_id(id).one(&state.orm).await?;
    let order = match order {
        Some(o) => o,
        None => return Err(AppError::NotFound("Order not found".into())),
    };

    if order.user_id != user.user_id && !user.is_admin() {
        return Err(AppError::Forbidden(
            "Not authorized to view this order".into(),
        ));
    }

    let items = OrderItems::find()
        .filter(OrderItemCol::OrderId.eq(order.id))
        .all(&state.orm)
        .await?
        .into_iter()
        .map(order_item_from_entity)
        .collect();

    let order = order_from_entity(order)?;
    Ok(ApiResponse::success(
        "OK",
        OrderWithItems { order, items },
        Some(Meta::empty()),
    ))
}

/// Owner-requested cancellation; only pending or confirmed orders qualify.
pub async fn cancel_order(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<OrderWithItems>> {
    let txn = state.orm.begin().await?;

    let order = Orders::find_by_id(id)
        .lock(LockType::Update)
        .one(&txn)
        .await?;
    let order = match order {
        Some(o) => o,
        None => return Err(AppError::NotFound("Order not found".into())),
    };

    if order.user_id != user.user_id {
        return Err(AppError::Forbidden(
            "Not authorized to cancel this order".into(),
        ));
    }

    let (current, payment, method) = parse_order_state(&order)?;
    let (new_status, new_payment) = domain::apply_transition(
        current,
        payment,
        OrderStatus::Cancelled,
        method,
        Actor::Owner,
    )
    .map_err(transition_error)?;

    let mut active: OrderActive = order.into();
    active.status = Set(new_status.as_str().to_string());
    active.payment_status = Set(new_payment.as_str().to_string());
    active.updated_at = Set(Utc::now().into());
    let order = active.update(&txn).await?;

    let items = OrderItems::find()
        .filter(OrderItemCol::OrderId.eq(order.id))
        .all(&txn)
        .await?
        .into_iter()
        .map(order_item_from_entity)
        .collect();

    txn.commit().await?;

    record_audit(
        &state.pool,
        Some(user.user_id),
        "order_cancel",
        Some("orders"),
        Some(serde_json::json!({ "order_id": order.id })),
    )
    .await;

    let order = order_from_entity(order)?;
    Ok(ApiResponse::success(
        "Order cancelled",
        OrderWithItems { order, items },
        Some(Meta::empty()),
    ))
}

fn validate_address(address: ShippingAddress) -> AppResult<ShippingAddress> {
    let required = [
        &address.street,
        &address.city,
        &address.state,
        &address.zip_code,
    ];
    if required.iter().any(|field| field.trim().is_empty()) {
        return Err(AppError::BadRequest(
            "Complete shipping address is required".into(),
        ));
    }
    Ok(address)
}

pub(crate) fn parse_status_filter(status: Option<&str>) -> AppResult<Option<OrderStatus>> {
    match status.filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(s) => OrderStatus::parse(s)
            .map(Some)
            .ok_or_else(|| AppError::BadRequest(invalid_status_message())),
    }
}

pub(crate) fn invalid_status_message() -> String {
    let valid: Vec<&str> = OrderStatus::ALL.iter().map(|s| s.as_str()).collect();
    format!("Invalid status. Must be one of: {}", valid.join(", "))
}

pub(crate) fn transition_error(err: TransitionError) -> AppError {
    match err {
        TransitionError::NotCancellable(_) => AppError::InvalidState(err.to_string()),
        TransitionError::OwnerRestricted => AppError::Forbidden(err.to_string()),
    }
}

pub(crate) fn parse_order_state(
    order: &OrderModel,
) -> AppResult<(OrderStatus, PaymentStatus, PaymentMethod)> {
    let status = OrderStatus::parse(&order.status)
        .ok_or_else(|| anyhow::anyhow!("stored order status is invalid: {}", order.status))?;
    let payment = PaymentStatus::parse(&order.payment_status).ok_or_else(|| {
        anyhow::anyhow!(
            "stored payment status is invalid: {}",
            order.payment_status
        )
    })?;
    let method = PaymentMethod::parse(&order.payment_method).ok_or_else(|| {
        anyhow::anyhow!(
            "stored payment method is invalid: {}",
            order.payment_method
        )
    })?;
    Ok((status, payment, method))
}

pub(crate) async fn attach_items(
    state: &AppState,
    orders: Vec<OrderModel>,
) -> AppResult<Vec<OrderWithItems>> {
    let ids: Vec<Uuid> = orders.iter().map(|o| o.id).collect();
    let mut by_order: HashMap<Uuid, Vec<OrderItem>> = HashMap::new();
    if !ids.is_empty() {
        for item in OrderItems::find()
            .filter(OrderItemCol::OrderId.is_in(ids))
            .all(&state.orm)
            .await?
        {
            by_order
                .entry(item.order_id)
                .or_default()
                .push(order_item_from_entity(item));
        }
    }

    orders
        .into_iter()
        .map(|model| {
            let items = by_order.remove(&model.id).unwrap_or_default();
            Ok(OrderWithItems {
                order: order_from_entity(model)?,
                items,
            })
        })
        .collect()
}

pub(crate) fn order_from_entity(model: OrderModel) -> AppResult<Order> {
    let (status, payment_status, payment_method) = parse_order_state(&model)?;
    Ok(Order {
        id: model.id,
        user_id: model.user_id,
        total_price: model.total_price,
        status,
        payment_status,
        payment_method,
        shipping_address: ShippingAddress {
            street: model.ship_street,
            city: model.ship_city,
            state: model.ship_state,
            zip_code: model.ship_zip_code,
            country: model.ship_country,
        },
        notes: model.notes,
        created_at: model.created_at.with_timezone(&Utc),
        updated_at: model.updated_at.with_timezone(&Utc),
    })
}

pub(crate) fn order_item_from_entity(model: OrderItemModel) -> OrderItem {
    OrderItem {
        id: model.id,
        order_id: model.order_id,
        product_id: model.product_id,
        name: model.name,
        quantity: model.quantity,
        price: model.price,
    }
}
