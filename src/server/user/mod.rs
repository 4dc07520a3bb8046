mod account;
mod keys;
mod projects;
mod repos;

use std::sync::Arc;

use axum::{
    Router, middleware,
    routing::post,
};

use crate::server::AppState;
use crate::server::pow::require_proof_of_work;

pub fn user_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    let guarded = Router::new()
        .route("/signUp", post(account::sign_up))
        .route("/signIn", post(account::sign_in))
        .route_layer(middleware::from_fn_with_state(state, require_proof_of_work));

    Router::new()
        .merge(guarded)
        .route("/signOut", post(account::sign_out))
        // Project routes, addressed by tenant_key and project_key
        .route(
            "/projects",
            post(projects::create_project)
                .get(projects::get_project)
                .patch(projects::update_project)
                .delete(projects::delete_project),
        )
        .route("/projects/teams", post(projects::add_team))
        // Repository routes
        .route("/repos", post(repos::create_repo).get(repos::get_repo))
        .route("/user/keys", post(keys::add_key))
}
