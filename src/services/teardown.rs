//! Finished phase shared by both games: the session lingers for a grace period so clients
//! can show the results, then it is deleted together with its chat log.

use tracing::{debug, info};

use crate::{
    dto::sse::DeletionReason,
    error::ServiceResult,
    services::session::{PhaseEvent, PhaseScope, SessionContext},
    state::timers::TimerPurpose,
};

pub(crate) struct Finished {
    scope: PhaseScope,
    timer: u64,
}

impl Finished {
    pub(crate) fn enter(ctx: &SessionContext, mut scope: PhaseScope) -> Self {
        let grace = ctx.config().finished_grace();
        let timer = scope.arm(TimerPurpose::FinishedGrace, grace);
        info!(session = %ctx.id(), ?grace, "session finished; deletion scheduled");
        Self { scope, timer }
    }

    pub(crate) async fn handle(
        &mut self,
        ctx: &SessionContext,
        event: PhaseEvent,
    ) -> ServiceResult<()> {
        match event {
            PhaseEvent::TimerFired {
                purpose: TimerPurpose::FinishedGrace,
                token,
            } if token == self.timer => {
                self.scope.cancel(TimerPurpose::FinishedGrace);
                ctx.delete_session(DeletionReason::Finished).await
            }
            other => {
                debug!(session = %ctx.id(), event = ?other, "ignored while finished");
                Ok(())
            }
        }
    }
}
