//! User-facing reply texts
//!
//! Every string a user can receive lives here, in Spanish, together with
//! the fixed-zone date formatting they share. The system preamble is one
//! template parameterized by tier and expiration so the tier variants
//! cannot drift apart.

use crate::config::{CommandPrefixes, DATE_FORMAT, TIME_ZONE};
use crate::store::SubscriptionTier;
use chrono::{DateTime, Utc};

/// Fixed apology sent for any internal failure. Deliberately vague.
pub const APOLOGY: &str = "Ocurrio un error, por favor intenta mas tarde.";

/// Reply when a transcription comes back empty.
pub const COULD_NOT_UNDERSTAND: &str = "Disculpa, no pude entender tu mensaje de voz.";

/// Reply when moderation flags a chat prompt.
pub const MODERATION_DENIAL: &str =
    "Tu consulta no cumple con nuestras politicas de contenido, intenta con otra.";

/// A timestamp rendered as `DD/MM/YYYY` in the bot's time zone.
#[must_use]
pub fn format_date(when: DateTime<Utc>) -> String {
    when.with_timezone(&TIME_ZONE).format(DATE_FORMAT).to_string()
}

/// Marketing name of a tier.
#[must_use]
pub const fn plan_name(tier: SubscriptionTier) -> &'static str {
    match tier {
        SubscriptionTier::Trial => "Periodo de Prueba",
        SubscriptionTier::Individual => "Plan Individual",
        SubscriptionTier::Group => "Plan Grupal",
    }
}

/// Greeting for a sender's first handled message, trial or purchased.
#[must_use]
pub fn welcome(
    tier: SubscriptionTier,
    expires_at: DateTime<Utc>,
    prefixes: &CommandPrefixes,
    terms_url: &str,
) -> String {
    let date = format_date(expires_at);
    let plan = plan_name(tier);
    let access = match tier {
        SubscriptionTier::Trial => {
            format!("Tu *{plan}* esta activo hasta el dia {date}.")
        }
        SubscriptionTier::Individual | SubscriptionTier::Group => {
            format!("Gracias por tu compra, tu *{plan}* esta activo hasta el dia {date}.")
        }
    };
    format!(
        "Bienvenido a *Charla*, tu asistente virtual. {access} \
         Envia *{status}* para consultar el estado de tu cuenta. \
         Al usar este servicio aceptas nuestros terminos: {terms_url}",
        status = prefixes.status,
    )
}

// --- Denials on the message-handling path ---

/// Trial ended by date.
#[must_use]
pub fn denial_trial_expired(renewal_url: &str) -> String {
    format!(
        "Tu *Periodo de Prueba* ha terminado, puedes seguir usando *Charla* \
         comprando una subscripcion en {renewal_url}"
    )
}

/// Trial ended by quota.
#[must_use]
pub fn denial_trial_quota(renewal_url: &str) -> String {
    format!(
        "Has agotado las consultas de tu *Periodo de Prueba*, puedes seguir \
         usando *Charla* comprando una subscripcion en {renewal_url}"
    )
}

/// Paid subscription past its expiration date.
#[must_use]
pub fn denial_subscription_expired(renewal_url: &str) -> String {
    format!("Tu subscripcion ha terminado, puedes renovarla en {renewal_url}")
}

/// Tier not allowed in group chats.
#[must_use]
pub fn denial_group_usage(tier: SubscriptionTier) -> String {
    let plan = plan_name(tier);
    format!(
        "Los usuarios con *{plan}* no pueden usar *Charla* en grupos. \
         Para usarlo en grupos necesitas el *Plan Grupal*."
    )
}

// --- Status command texts ---

/// Status for a sender with no record.
#[must_use]
pub fn status_not_active() -> String {
    "Tu cuenta de *Charla* no esta activa. Para comenzar tu *Periodo de Prueba* \
     envia tu primer consulta."
        .to_string()
}

/// Status for an active trial.
#[must_use]
pub fn status_trial_active(expires_at: DateTime<Utc>) -> String {
    format!(
        "Puedes disfrutar de tu *Periodo de Prueba* hasta el dia {}.",
        format_date(expires_at)
    )
}

/// Status for a trial out of quota.
#[must_use]
pub fn status_trial_quota(renewal_url: &str) -> String {
    denial_trial_quota(renewal_url)
}

/// Status for a trial past its date.
#[must_use]
pub fn status_trial_expired(renewal_url: &str) -> String {
    denial_trial_expired(renewal_url)
}

/// Status for an active paid subscription.
#[must_use]
pub fn status_paid_active(tier: SubscriptionTier, expires_at: DateTime<Utc>) -> String {
    format!(
        "La subscripcion a tu *{}* esta activa hasta el dia {}.",
        plan_name(tier),
        format_date(expires_at)
    )
}

/// Status for an expired paid subscription.
#[must_use]
pub fn status_paid_expired(renewal_url: &str) -> String {
    denial_subscription_expired(renewal_url)
}

// --- Completion preamble ---

/// System preamble for the completion provider.
///
/// One template for every tier; only the subscription line varies.
#[must_use]
pub fn system_preamble(
    tier: SubscriptionTier,
    expires_at: DateTime<Utc>,
    now: DateTime<Utc>,
    prefixes: &CommandPrefixes,
    site_url: &str,
) -> String {
    let plan = plan_name(tier);
    let date = format_date(expires_at);
    let plan_line = match tier {
        SubscriptionTier::Trial => format!(
            "El usuario esta en su {plan}, que termina el dia {date}; despues puede \
             contratar una subscripcion en {site_url}."
        ),
        SubscriptionTier::Individual | SubscriptionTier::Group => format!(
            "El usuario tiene la subscripcion al {plan} activa hasta el dia {date}; \
             puede renovarla en {site_url}."
        ),
    };

    format!(
        "Eres Charla, un asistente virtual que responde mensajes de chat en espanol \
         de forma amable, clara y concisa. La fecha de hoy es {today}. {plan_line} \
         El usuario puede generar imagenes enviando {img} seguido de una descripcion, \
         y consultar el estado de su cuenta enviando {status}.",
        today = format_date(now),
        img = prefixes.image,
        status = prefixes.status,
    )
}
