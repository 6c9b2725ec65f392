use std::sync::Arc;

use anyhow::Result;
use tokio::sync::mpsc;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::dispatcher::{Dispatcher, Outcome};
use crate::error::DispatchError;
use crate::platform::{self, InboundEvent, Message};
use crate::source::{Source, Sources};

/// Shared application state
pub struct Bot {
    sources: Sources,
    dispatcher: Dispatcher,
}

impl Bot {
    pub fn new(sources: Sources, dispatcher: Dispatcher) -> Self {
        Self {
            sources,
            dispatcher,
        }
    }

    /// Normalize and handle one raw event. Never fails: every error ends here.
    pub async fn handle_event(&self, event: InboundEvent) {
        let Some(source) = self.sources.get(&event.source) else {
            warn!("Event for unconfigured source {}", event.source);
            return;
        };
        let Some(message) = platform::normalize(event.source, &event.payload) else {
            debug!("Skipping non-message {} event", event.source);
            return;
        };

        let span = info_span!(
            "message",
            source = %message.source(),
            org = message.organization_id().unwrap_or("-"),
            user = message.user_id(),
            private = message.is_private(),
        );
        self.handle_message(source, &message).instrument(span).await;
    }

    pub async fn handle_message(&self, source: &Source, message: &Message) {
        match self.dispatcher.process(source, message).await {
            Ok(Outcome::NotACommand) => {}
            Ok(Outcome::Rejected {
                stage,
                reason,
                reply,
            }) => {
                debug!("Answering {} rejection at {:?}", reason.error_code(), stage);
                self.send(source, message, &reply).await;
            }
            Ok(Outcome::Executed { reply, .. }) if reply.is_empty() => {}
            Ok(Outcome::Executed { command, reply }) => {
                self.send(source, message, &reply).await;
                debug!("Replied to {}", command);
            }
            Err(e @ DispatchError::Platform(_)) => {
                warn!("Platform call failed ({}): {}", e.error_code(), e);
                let loc = self.dispatcher.localizer_for(source, message).await;
                self.send(source, message, &loc.get("error.platform")).await;
            }
            Err(e) => {
                error!("Error processing message ({}): {:#}", e.error_code(), e);
                let loc = self.dispatcher.localizer_for(source, message).await;
                self.send(source, message, &loc.get("error.internal")).await;
            }
        }
    }

    async fn send(&self, source: &Source, message: &Message, text: &str) {
        if let Err(e) = source.reply(message.reply_channel(), text).await {
            warn!("Failed to send reply to {}: {}", message.reply_channel(), e);
        }
    }
}

/// Consume the event feed, one task per event.
pub async fn run(bot: Arc<Bot>, mut events: mpsc::Receiver<InboundEvent>) -> Result<()> {
    info!("Bot is processing events");
    while let Some(event) = events.recv().await {
        let bot = Arc::clone(&bot);
        tokio::spawn(async move {
            bot.handle_event(event).await;
        });
    }
    info!("Event feed closed");
    Ok(())
}
