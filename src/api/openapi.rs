use super::handlers::{auth, health, tenants};
use utoipa::openapi::{
    security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Contact, InfoBuilder, License, OpenApiBuilder, Tag,
};
use utoipa_axum::{router::OpenApiRouter, routes};

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    let (_router, openapi) = api_router().split_for_parts();
    openapi
}

/// Build the router that also drives the `OpenAPI` document.
///
/// Endpoints registered with `.routes(routes!(...))` are both served and
/// documented. Routes added in `api::app` (`OPTIONS /health`) are not.
pub(crate) fn api_router() -> OpenApiRouter {
    let mut router = OpenApiRouter::with_openapi(cargo_openapi())
        .routes(routes!(health::health))
        .routes(routes!(auth::login::login))
        .routes(routes!(auth::refresh::refresh))
        .routes(routes!(auth::logout::logout))
        .routes(routes!(auth::session::session))
        .routes(routes!(auth::csrf::issue_csrf))
        .routes(routes!(auth::two_factor::verify_two_factor))
        .routes(routes!(auth::two_factor::setup_two_factor))
        .routes(routes!(auth::two_factor::enable_two_factor))
        .routes(routes!(tenants::allowed))
        .routes(routes!(tenants::refresh));

    let mut gatehouse_tag = Tag::new("gatehouse");
    gatehouse_tag.description = Some("Session and tenant coordination layer".to_string());

    let mut auth_tag = Tag::new("auth");
    auth_tag.description = Some("Login, token refresh, logout and two-factor".to_string());

    let mut tenants_tag = Tag::new("tenants");
    tenants_tag.description = Some("Tenant allow-list".to_string());

    let mut health_tag = Tag::new("health");
    health_tag.description = Some("Liveness and build information".to_string());

    let openapi = router.get_openapi_mut();
    openapi.tags = Some(vec![gatehouse_tag, auth_tag, tenants_tag, health_tag]);
    openapi
        .components
        .get_or_insert_with(Default::default)
        .add_security_scheme(
            "bearer",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );

    router
}

fn cargo_openapi() -> utoipa::openapi::OpenApi {
    // Cargo.toml metadata instead of the utoipa-axum defaults.
    let mut info = InfoBuilder::new()
        .title(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .description(optional_str(env!("CARGO_PKG_DESCRIPTION")))
        .build();

    info.contact = cargo_contact();
    info.license = cargo_license();

    OpenApiBuilder::new().info(info).build()
}

fn cargo_contact() -> Option<Contact> {
    // Cargo authors are `;` separated and may include "Name <email>".
    let authors = env!("CARGO_PKG_AUTHORS");
    let primary = authors.split(';').next().map(str::trim)?;
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
    Some(value.trim()).filter(|trimmed| !trimmed.is_empty())
}

fn parse_author(author: &str) -> (Option<&str>, Option<&str>) {
    fn non_empty(value: &str) -> Option<&str> {
        let value = value.trim();
        (!value.is_empty()).then_some(value)
    }
    match author.split_once('<') {
        Some((name, rest)) => (non_empty(name), non_empty(rest.trim_end_matches('>'))),
        None => (non_empty(author), None),
    }
}
