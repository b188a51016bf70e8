//! Scripted endpoint behaviour

use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, trace};

use tfm_sip_core::{Message, Method, StatusCode};

use crate::arena::MessageHandle;
use crate::error::ClientResult;
use crate::user_agent::UserAgent;

/// One step of endpoint behaviour.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    NoAction,
    /// Answer the triggering request (or the last one received) with a status
    Respond(StatusCode),
    Send100,
    /// 180 for the current incoming INVITE
    Ring,
    /// 200 with Contact for the current incoming INVITE
    Answer,
    /// 200 for the triggering request
    Ok,
    Cancel,
    Ack,
    DigestRespond,
    Retransmit(MessageHandle),
    Pause(Duration),
    Chain(Vec<Action>),
    Bye,
}

impl Action {
    pub fn chain(actions: impl IntoIterator<Item = Action>) -> Self {
        Action::Chain(actions.into_iter().collect())
    }
}

/// Runs [`Action`]s against a [`UserAgent`].
pub struct ActionInterpreter<'a> {
    agent: &'a UserAgent,
}

impl<'a> ActionInterpreter<'a> {
    pub fn new(agent: &'a UserAgent) -> Self {
        Self { agent }
    }

    /// Executes `action`. `trigger` is the message the action reacts to;
    /// responses go to it when it is a request.
    pub async fn run(&self, action: &Action, trigger: Option<&Message>) -> ClientResult<()> {
        let request = trigger.and_then(Message::as_request);
        let mut pending = vec![action];

        while let Some(action) = pending.pop() {
            trace!(?action, "Running action");
            match action {
                Action::NoAction => {}
                Action::Chain(actions) => pending.extend(actions.iter().rev()),
                Action::Respond(status) => {
                    self.respond(request, *status).await?;
                }
                Action::Send100 => {
                    self.respond(request, StatusCode::Trying).await?;
                }
                Action::Ok => {
                    // CANCEL was answered by its server transaction already
                    if request.is_some_and(|r| r.method == Method::Cancel) {
                        debug!("CANCEL already answered, skipping 200");
                        continue;
                    }
                    self.respond(request, StatusCode::Ok).await?;
                }
                Action::Ring => {
                    self.agent.ring().await?;
                }
                Action::Answer => {
                    self.agent.answer().await?;
                }
                Action::Cancel => {
                    self.agent.cancel().await?;
                }
                Action::Ack => {
                    self.agent.ack().await?;
                }
                Action::DigestRespond => {
                    self.agent.digest_respond().await?;
                }
                Action::Retransmit(handle) => self.agent.retransmit(*handle).await?,
                Action::Pause(duration) => sleep(*duration).await,
                Action::Bye => {
                    self.agent.bye().await?;
                }
            }
        }
        Ok(())
    }

    async fn respond(&self, request: Option<&tfm_sip_core::Request>, status: StatusCode) -> ClientResult<()> {
        match request {
            Some(request) => self.agent.respond_to(request, status).await.map(|_| ()),
            None => self.agent.respond(status).await.map(|_| ()),
        }
    }
}
