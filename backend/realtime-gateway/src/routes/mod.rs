// Re-export route modules
pub mod events;
pub mod ops;

use actix_web::web;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(events::attach_anonymous)
        .service(events::attach_user)
        .service(ops::healthz)
        .service(ops::metrics_endpoint)
        .service(ops::publish)
        .service(ops::send)
        .service(ops::clear_queue);
}
