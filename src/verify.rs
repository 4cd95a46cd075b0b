use std::sync::Arc;

use serenity::all::{ComponentInteraction, Context, Interaction};
use serenity::builder::{CreateInteractionResponse, CreateInteractionResponseMessage};

use crate::gateway::Outcome;
use crate::sentinel::Sentinel;

/// `custom_id` przycisku weryfikacji w panelu.
pub const VERIFY_BUTTON_ID: &str = "verify_accept";

pub struct Verify;

impl Verify {
    /* ======================
       BRAMA INTERAKCJI
       ====================== */

    /// Jedna brama do obsługi interakcji związanych z weryfikacją.
    /// Wołaj w `interaction_create` (mod.rs).
    pub async fn on_interaction(ctx: &Context, sentinel: &Arc<Sentinel>, interaction: Interaction) {
        if let Some(component) = interaction.message_component() {
            if component.data.custom_id == VERIFY_BUTTON_ID {
                Self::on_component(ctx, sentinel, &component).await;
            }
        }
    }

    async fn on_component(ctx: &Context, sentinel: &Arc<Sentinel>, component: &ComponentInteraction) {
        let Some(guild_id) = component.guild_id else {
            return;
        };
        let user_id = component.user.id.get();
        let outcome = sentinel.gateway.process(guild_id.get(), user_id).await;

        let reply = CreateInteractionResponse::Message(
            CreateInteractionResponseMessage::new()
                .content(reply_text(&outcome))
                .ephemeral(true),
        );
        if let Err(e) = component.create_response(&ctx.http, reply).await {
            tracing::warn!(error=?e, gid=%guild_id.get(), uid=%user_id, "verify reply failed");
        }
    }
}

/// Krótka odpowiedź dla użytkownika. Szczegóły błędów zostają w logach.
pub fn reply_text(outcome: &Outcome) -> &'static str {
    match outcome {
        Outcome::Success(_) | Outcome::Bypassed => "✅ Weryfikacja zakończona – witamy na serwerze!",
        Outcome::AlreadyVerified => "ℹ️ Jesteś już zweryfikowany.",
        Outcome::BlockedAccountAge => "⛔ Twoje konto jest zbyt nowe, by przejść weryfikację.",
        Outcome::BlockedJoinAge => "⏳ Dołączyłeś przed chwilą – spróbuj ponownie za kilka minut.",
        Outcome::BlockedRateLimit => "⏳ Zbyt wiele prób – odczekaj minutę.",
        Outcome::GatewayLocked => "🔒 Weryfikacja jest chwilowo wstrzymana. Spróbuj później.",
        Outcome::Error(_) => "⚠️ Nie udało się Cię zweryfikować. Skontaktuj się z administratorem.",
    }
}

/// Czy po wyniku przy wejściu warto wysłać DM (odmowa, którą user może naprawić czekaniem).
pub fn should_notify_on_join(outcome: &Outcome) -> bool {
    matches!(
        outcome,
        Outcome::BlockedAccountAge
            | Outcome::BlockedJoinAge
            | Outcome::BlockedRateLimit
            | Outcome::GatewayLocked
    )
}
