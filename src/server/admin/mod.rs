mod privileges;
mod tenants;

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};

use crate::server::AppState;

pub fn admin_router() -> Router<Arc<AppState>> {
    Router::new()
        // Privilege groups
        .route(
            "/privileges",
            post(privileges::apply_privileges).get(privileges::get_privileges),
        )
        // Tenant routes
        .route("/tenants", post(tenants::create_tenant))
        .route("/tenants", get(tenants::list_tenants))
        .route(
            "/tenants/{id}",
            get(tenants::get_tenant)
                .patch(tenants::update_tenant)
                .delete(tenants::delete_tenant),
        )
}
