use tracing::{info, instrument};

use super::Context;
use crate::{
    account::UserId,
    command::{TemplateCommand, TemplateRequest},
    error::{LedgerError, LedgerResult},
    transfer::{TemplateId, TransferTemplate},
};

/// Saved transfer details. Templates never move money, so no row locks are
/// taken.
#[derive(Clone)]
pub struct TransferTemplates {
    ctx: Context,
}

impl TransferTemplates {
    pub(crate) fn new(ctx: Context) -> Self {
        Self { ctx }
    }

    #[instrument(skip(self, request), fields(user_id = %request.user_id), err(level = "info"))]
    pub async fn create_template(&self, request: TemplateRequest) -> LedgerResult<TransferTemplate> {
        let command = TemplateCommand::parse(request)?;
        let template = TransferTemplate::new(command, self.ctx.clock.now());
        let mut tx = self.ctx.store.begin().await?;
        tx.save_template(template.clone()).await?;
        tx.commit().await?;
        info!(template_id = %template.id, "transfer template saved");
        Ok(template)
    }

    pub async fn list_templates(&self, user_id: UserId) -> LedgerResult<Vec<TransferTemplate>> {
        self.ctx
            .read("templates_for_user", || self.ctx.store.templates_for_user(user_id))
            .await
    }

    /// Deactivates the template. Deleting an already deleted template of the
    /// same user succeeds.
    #[instrument(skip(self), err(level = "info"))]
    pub async fn delete_template(&self, user_id: UserId, template_id: TemplateId) -> LedgerResult<()> {
        let mut template = self
            .ctx
            .read("template", || self.ctx.store.template(template_id))
            .await?
            .filter(|t| t.user_id == user_id)
            .ok_or(LedgerError::not_found("Template"))?;
        if !template.is_active() {
            return Ok(());
        }
        template.deactivate();
        let mut tx = self.ctx.store.begin().await?;
        tx.save_template(template).await?;
        tx.commit().await?;
        info!("transfer template deleted");
        Ok(())
    }
}
