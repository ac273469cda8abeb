use utoipa::{
    Modify, OpenApi,
    openapi::{
        self,
        OpenApi as OpenApiSpec,
        security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    },
};
use utoipa_scalar::{Scalar, Servable};

use crate::{
    domain::{EventStatus, OrderStatus, PaymentMethod, PaymentStatus},
    dto::{
        cart::{AddToCartRequest, UpdateCartItemRequest},
        events::{CreateEventRequest, EventList, UpdateEventRequest},
        orders::{CheckoutRequest, OrderList, OrderWithItems, UpdateOrderStatusRequest},
        products::{CreateProductRequest, ProductList, UpdateProductRequest},
    },
    models::{Cart, CartItem, Event, Order, OrderItem, Product, ShippingAddress, User},
    response::{ApiResponse, Meta},
    routes::{admin, auth, cart, events, health, orders, params, products},
};

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health_check,
        auth::login,
        auth::register,
        products::list_products,
        products::get_product,
        products::create_product,
        products::update_product,
        events::list_events,
        events::get_event,
        events::create_event,
        events::update_event,
        events::delete_event,
        events::register_for_event,
        cart::get_cart,
        cart::add_to_cart,
        cart::update_cart_item,
        cart::remove_cart_item,
        cart::clear_cart,
        orders::checkout,
        orders::list_my_orders,
        orders::get_order,
        orders::cancel_order,
        admin::list_all_orders,
        admin::get_order_admin,
        admin::update_order_status,
        admin::list_users,
        admin::update_user_role,
        admin::toggle_product
    ),
    components(
        schemas(
            User,
            Product,
            Cart,
            CartItem,
            Event,
            Order,
            OrderItem,
            ShippingAddress,
            OrderStatus,
            PaymentStatus,
            PaymentMethod,
            EventStatus,
            AddToCartRequest,
            UpdateCartItemRequest,
            CheckoutRequest,
            UpdateOrderStatusRequest,
            CreateProductRequest,
            UpdateProductRequest,
            CreateEventRequest,
            UpdateEventRequest,
            ProductList,
            EventList,
            OrderList,
            OrderWithItems,
            admin::UpdateUserRoleRequest,
            params::Pagination,
            params::ProductQuery,
            params::EventListQuery,
            params::OrderListQuery,
            params::UserListQuery,
            Meta,
            ApiResponse<Cart>,
            ApiResponse<Product>,
            ApiResponse<ProductList>,
            ApiResponse<Event>,
            ApiResponse<EventList>,
            ApiResponse<OrderWithItems>,
            ApiResponse<OrderList>
        )
    ),
    security(
        ("bearer_auth" = [])
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Health check endpoint"),
        (name = "Auth", description = "Authentication endpoints"),
        (name = "Products", description = "Catalog endpoints"),
        (name = "Events", description = "Event and registration endpoints"),
        (name = "Cart", description = "Cart endpoints"),
        (name = "Orders", description = "Order endpoints"),
        (name = "Admin", description = "Admin endpoints"),
    )
)]
pub struct ApiDoc;

pub fn scalar_docs() -> Scalar<OpenApiSpec> {
    Scalar::with_url("/docs", ApiDoc::openapi())
}
