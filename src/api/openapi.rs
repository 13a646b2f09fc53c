use super::handlers::{accounts, auth, health, me, profiles};
use utoipa::openapi::{Contact, InfoBuilder, License, OpenApiBuilder, Tag};
use utoipa_axum::{router::OpenApiRouter, routes};

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    // Reuse the same router wiring and only return the generated OpenAPI document.
    let (_router, openapi) = api_router().split_for_parts();
    openapi
}

/// Build the router that also drives the `OpenAPI` document.
///
/// Add new endpoints here via `.routes(routes!(...))` so they are both served
/// and included in the generated `OpenAPI` document. Handlers sharing a path go in
/// one `routes!` call. `OPTIONS /health` is added outside and not documented.
pub(crate) fn api_router() -> OpenApiRouter {
    let mut gatekeep_tag = Tag::new("gatekeep");
    gatekeep_tag.description = Some("Gateway-backed login and provisioning API".to_string());

    let mut auth_tag = Tag::new("auth");
    auth_tag.description = Some("Login, signup and password recovery".to_string());

    let mut me_tag = Tag::new("me");
    me_tag.description = Some("Self-service for the gateway-authenticated caller".to_string());

    let mut admin_tag = Tag::new("admin");
    admin_tag.description = Some("Account and rate-limit profile management".to_string());

    let mut base = cargo_openapi();
    base.tags = Some(vec![gatekeep_tag, auth_tag, me_tag, admin_tag]);

    let router = OpenApiRouter::with_openapi(base)
        .routes(routes!(health::health))
        .routes(routes!(auth::login))
        .routes(routes!(auth::federated))
        .routes(routes!(auth::check_token))
        .routes(routes!(auth::logout))
        .routes(routes!(auth::signup))
        .routes(routes!(auth::password_recovery))
        .routes(routes!(auth::password_reset))
        .routes(routes!(me::me))
        .routes(routes!(me::api_key))
        .routes(routes!(me::send_verification))
        .routes(routes!(me::confirm_verification))
        .routes(routes!(accounts::list_accounts, accounts::create_account))
        .routes(routes!(
            accounts::get_account,
            accounts::update_account,
            accounts::delete_account
        ))
        .routes(routes!(profiles::list_profiles, profiles::create_profile))
        .routes(routes!(profiles::sync_default_profiles))
        .routes(routes!(
            profiles::get_profile,
            profiles::update_profile,
            profiles::delete_profile
        ));

    router
}

fn cargo_openapi() -> utoipa::openapi::OpenApi {
    // Use Cargo.toml metadata instead of the utoipa-axum crate info defaults.
    let mut info = InfoBuilder::new()
        .title(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .description(optional_str(env!("CARGO_PKG_DESCRIPTION")))
        .build();

    info.contact = cargo_contact(env!("CARGO_PKG_AUTHORS"));
    info.license = cargo_license();

    OpenApiBuilder::new().info(info).build()
}

fn cargo_contact(authors: &str) -> Option<Contact> {
    // Cargo authors are `:` separated and may include "Name <email>".
    let primary = authors.split(':').next().map(str::trim)?;
    if primary.is_empty() {
        return None;
    }

    let (name, email) = parse_author(primary);
    if name.is_none() && email.is_none() {
        return None;
    }

    let mut contact = Contact::new();
    contact.name = name.map(str::to_string);
    contact.email = email.map(str::to_string);
    Some(contact)
}

fn cargo_license() -> Option<License> {
    let identifier = optional_str(env!("CARGO_PKG_LICENSE"))?;
    let mut license = License::new(identifier);
    license.identifier = Some(identifier.to_string());
    Some(license)
}

fn optional_str(value: &'static str) -> Option<&'static str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

fn parse_author(author: &str) -> (Option<&str>, Option<&str>) {
    fn non_empty(value: &str) -> Option<&str> {
        (!value.is_empty()).then_some(value)
    }

    match author.find('<') {
        Some(start) => {
            let name = author[..start].trim();
            let email = author[start + 1..].trim_end_matches('>').trim();
            (non_empty(name), non_empty(email))
        }
        None => (non_empty(author.trim()), None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_info_from_cargo() {
        let spec = openapi();
        assert_eq!(spec.info.title, env!("CARGO_PKG_NAME"));
        assert_eq!(spec.info.version, env!("CARGO_PKG_VERSION"));
        assert_eq!(
            spec.info.description.as_deref(),
            Some(env!("CARGO_PKG_DESCRIPTION"))
        );

        let license = spec.info.license;
        assert!(license.is_some());
        if let Some(license) = license {
            assert_eq!(license.name, "BSD-3-Clause");
            assert_eq!(license.identifier.as_deref(), Some("BSD-3-Clause"));
        }
    }

    #[test]
    fn contact_from_authors() {
        let contact = cargo_contact("Ops Team <ops@example.com>:Someone Else").unwrap();
        assert_eq!(contact.name.as_deref(), Some("Ops Team"));
        assert_eq!(contact.email.as_deref(), Some("ops@example.com"));

        assert!(cargo_contact("").is_none());
        assert_eq!(parse_author("<ops@example.com>"), (None, Some("ops@example.com")));
        assert_eq!(parse_author("Just A Name"), (Some("Just A Name"), None));
    }

    #[test]
    fn openapi_tags_and_paths() {
        let spec = openapi();
        let tags = spec.tags.clone().unwrap_or_default();
        for name in ["gatekeep", "auth", "me", "admin"] {
            assert!(tags.iter().any(|tag| tag.name == name), "missing tag {name}");
        }

        for path in [
            "/health",
            "/v1/auth/token",
            "/v1/auth/federated",
            "/v1/auth/check-token",
            "/v1/auth/logout",
            "/v1/auth/signup",
            "/v1/auth/password-recovery",
            "/v1/auth/password-reset",
            "/v1/me",
            "/v1/me/api-key",
            "/v1/me/verification",
            "/v1/me/verification/confirm",
            "/v1/accounts",
            "/v1/accounts/{id}",
            "/v1/profiles",
            "/v1/profiles/{name}",
            "/v1/profiles/sync-defaults",
        ] {
            assert!(spec.paths.paths.contains_key(path), "missing path {path}");
        }
    }
}
