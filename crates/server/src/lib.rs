pub mod config;
pub mod error;
pub mod routes;

use db::DBService;
use maestro::GraphEngine;
use services::services::{
    agent_end_task::AgentEndTaskService, notifications::NotificationService,
    webhook_delivery::WebhookDeliveryService,
};

/// Shared handles passed to every route group through axum state.
#[derive(Clone)]
pub struct AppState {
    db: DBService,
    engine: GraphEngine,
    notifications: NotificationService,
    delivery: WebhookDeliveryService,
    end_tasks: AgentEndTaskService,
}

impl AppState {
    pub fn new(
        db: DBService,
        engine: GraphEngine,
        notifications: NotificationService,
        delivery: WebhookDeliveryService,
        end_tasks: AgentEndTaskService,
    ) -> Self {
        Self {
            db,
            engine,
            notifications,
            delivery,
            end_tasks,
        }
    }

    pub fn db(&self) -> &DBService {
        &self.db
    }

    pub fn engine(&self) -> &GraphEngine {
        &self.engine
    }

    pub fn notifications(&self) -> &NotificationService {
        &self.notifications
    }

    pub fn delivery(&self) -> &WebhookDeliveryService {
        &self.delivery
    }

    pub fn end_tasks(&self) -> &AgentEndTaskService {
        &self.end_tasks
    }
}
