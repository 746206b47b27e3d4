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
    dto::{
        auth::{LoginRequest, LoginResponse, Profile, SignupRequest},
        cart::{AddToCartForm, SetCartItemRequest},
        orders::{OrderList, OrderWithItems},
        products::ProductList,
    },
    models::{Order, OrderItem, Product, User},
    pricing::{CartLine, CartView},
    response::{ApiResponse, Meta},
    routes::{auth, cart, health, orders, params, products},
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
        auth::signup,
        auth::login,
        auth::logout,
        auth::me,
        products::list_products,
        products::get_product,
        products::add_to_cart,
        cart::view_cart,
        cart::set_cart_item,
        cart::remove_from_cart,
        cart::clear_cart,
        orders::list_orders,
        orders::get_order,
        orders::checkout
    ),
    components(
        schemas(
            User,
            Product,
            Order,
            OrderItem,
            CartLine,
            CartView,
            ProductList,
            OrderList,
            OrderWithItems,
            AddToCartForm,
            SetCartItemRequest,
            SignupRequest,
            LoginRequest,
            LoginResponse,
            Profile,
            params::Pagination,
            params::ProductQuery,
            Meta,
            ApiResponse<Product>,
            ApiResponse<ProductList>,
            ApiResponse<CartView>,
            ApiResponse<OrderWithItems>,
            ApiResponse<OrderList>
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Health check endpoint"),
        (name = "Products", description = "Catalog browsing and add-to-cart"),
        (name = "Cart", description = "Session cart endpoints"),
        (name = "Orders", description = "Checkout and order history"),
        (name = "Auth", description = "Signup, login and sessions"),
    )
)]
pub struct ApiDoc;

pub fn scalar_docs() -> Scalar<OpenApiSpec> {
    Scalar::with_url("/docs", ApiDoc::openapi())
}
