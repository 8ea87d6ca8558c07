//! Inbound trigger surface.
//!
//! Maps each way a user can ask for a send (menus, shortcut, explicit
//! request, programmatic link) onto a [`SendRequest`], and reports menu
//! failures through a notification since menus have no other way to show
//! them.

use std::{sync::Arc, time::Duration};

use courier_core::{Action, TabId};
use tracing::{debug, warn};

use crate::{
    context::{PageContext, SideEffects, TabInfo},
    dispatcher::{DispatchOutcome, Dispatcher, SendRequest},
    error::{DeliveryError, Result},
    processor::RetryScheduler,
};

/// Notification title for a failed menu send.
pub const FAILURE_NOTIFICATION_TITLE: &str = "Failed to Send URL";

/// A user or programmatic request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// Page context menu.
    PageMenu {
        /// URL of the page the menu was opened on
        page_url: Option<String>,
        /// Tab the menu was opened in
        tab: Option<TabInfo>,
    },
    /// Link context menu.
    LinkMenu {
        /// URL of the link
        link_url: Option<String>,
        /// Tab containing the link
        tab_id: Option<TabId>,
    },
    /// Keyboard shortcut: sends the active tab.
    Shortcut,
    /// Explicit "send active tab" request.
    SendActive {
        /// Destination overriding the configured one
        webhook_override: Option<String>,
        /// Skip duplicate suppression
        force_send: bool,
    },
    /// Programmatic link send.
    SendLink {
        /// URL to send
        url: String,
    },
    /// Run the queue processor now.
    RetryQueue,
}

/// Result of handling a trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerResponse {
    /// A send was attempted.
    Dispatched(DispatchOutcome),
    /// Nothing to do (shortcut without an active tab).
    Skipped,
    /// A processor pass was requested.
    RetryRequested,
}

/// Routes triggers to the dispatcher.
pub struct TriggerHandler {
    dispatcher: Arc<Dispatcher>,
    page: Arc<dyn PageContext>,
    effects: Arc<dyn SideEffects>,
    scheduler: Arc<dyn RetryScheduler>,
}

impl TriggerHandler {
    /// Creates a handler.
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        page: Arc<dyn PageContext>,
        effects: Arc<dyn SideEffects>,
        scheduler: Arc<dyn RetryScheduler>,
    ) -> Self {
        Self { dispatcher, page, effects, scheduler }
    }

    /// Handles one trigger.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Storage` when the dispatcher cannot reach
    /// persisted state.
    pub async fn handle(&self, trigger: Trigger) -> Result<TriggerResponse> {
        match trigger {
            Trigger::PageMenu { page_url, tab } => {
                let target = page_url
                    .or_else(|| tab.as_ref().map(|t| t.url.clone()))
                    .unwrap_or_default();
                let mut request = SendRequest::new(Action::Page, target);
                request.tab_id = tab.map(|t| t.id);
                self.menu_send(request).await
            },
            Trigger::LinkMenu { link_url, tab_id } => {
                let mut request = SendRequest::new(Action::Link, link_url.unwrap_or_default());
                request.tab_id = tab_id;
                self.menu_send(request).await
            },
            Trigger::Shortcut => {
                let Some(tab) = self.active_tab().await else {
                    debug!("shortcut pressed with no active tab");
                    return Ok(TriggerResponse::Skipped);
                };
                let request = SendRequest::new(Action::Shortcut, tab.url).with_tab(tab.id);
                self.send(request).await
            },
            Trigger::SendActive { webhook_override, force_send } => {
                let Some(tab) = self.active_tab().await else {
                    let outcome = DispatchOutcome::failed(None, DeliveryError::NoActiveTab);
                    return Ok(TriggerResponse::Dispatched(outcome));
                };
                let mut request =
                    SendRequest::new(Action::Click, tab.url).with_tab(tab.id).forced(force_send);
                request.webhook_override = webhook_override;
                self.send(request).await
            },
            Trigger::SendLink { url } => {
                let mut request = SendRequest::new(Action::Link, url);
                request.tab_id = self.active_tab().await.map(|t| t.id);
                self.send(request).await
            },
            Trigger::RetryQueue => {
                self.scheduler.schedule(Duration::ZERO);
                Ok(TriggerResponse::RetryRequested)
            },
        }
    }

    async fn send(&self, request: SendRequest) -> Result<TriggerResponse> {
        Ok(TriggerResponse::Dispatched(self.dispatcher.send_or_enqueue(request).await?))
    }

    async fn menu_send(&self, request: SendRequest) -> Result<TriggerResponse> {
        match self.dispatcher.send_or_enqueue(request).await {
            Ok(outcome) => {
                if let Some(message) = outcome.message().filter(|_| !outcome.ok) {
                    self.effects.notify(FAILURE_NOTIFICATION_TITLE, &message);
                }
                Ok(TriggerResponse::Dispatched(outcome))
            },
            Err(e) => {
                warn!(error = %e, "menu send failed");
                self.effects.notify("Error", "Failed to send URL. Check your settings.");
                Err(e)
            },
        }
    }

    async fn active_tab(&self) -> Option<TabInfo> {
        match self.page.active_tab().await {
            Ok(tab) => tab,
            Err(e) => {
                debug!(error = %e, "active tab lookup failed");
                None
            },
        }
    }
}
