use crate::errors::AppError;
use crate::models::{
    BulkEnrichmentRequest, CompanyEnrichmentRequest, PersonEnrichmentRequest, SearchPeopleQuery,
};
use regex::Regex;
use std::sync::LazyLock;

pub const MAX_BULK_ITEMS: usize = 100;
pub const DEFAULT_SEARCH_LIMIT: usize = 50;
pub const MAX_SEARCH_LIMIT: usize = 100;
pub const MAX_SEARCH_OFFSET: usize = 10_000;

// RFC 5322 simplified: local@domain.tld
static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)+$",
    )
    .expect("email regex is valid")
});

// Platform login charset
static HANDLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9-]{1,39}$").expect("handle regex is valid")
});

// Dot-separated labels with an alphabetic TLD
static HOSTNAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?\.)+[a-zA-Z]{2,63}$",
    )
    .expect("hostname regex is valid")
});

/// Validates email syntax.
pub fn is_valid_email(email: &str) -> bool {
    if email.len() < 5 || email.len() > 254 {
        return false;
    }

    EMAIL_RE.is_match(email)
}

pub fn is_valid_handle(handle: &str) -> bool {
    HANDLE_RE.is_match(handle)
}

/// Bare hostname, no scheme, path or port.
pub fn is_valid_domain(domain: &str) -> bool {
    domain.len() <= 253 && HOSTNAME_RE.is_match(domain)
}

/// Accepts absolute `http`/`https` URLs with a host.
pub fn is_valid_url(value: &str) -> bool {
    match url::Url::parse(value) {
        Ok(url) => matches!(url.scheme(), "http" | "https") && url.host_str().is_some(),
        Err(_) => false,
    }
}

/// Lowercases a domain and strips a leading `www.`.
pub fn normalize_domain(domain: &str) -> String {
    let lower = domain.trim().to_lowercase();
    match lower.strip_prefix("www.") {
        Some(rest) => rest.to_string(),
        None => lower,
    }
}

/// Domain part of an email address, lowercased.
pub fn email_domain(email: &str) -> Option<String> {
    let (_, domain) = email.rsplit_once('@')?;
    if domain.is_empty() {
        None
    } else {
        Some(domain.to_lowercase())
    }
}

/// Canonical domain of a website URL.
pub fn domain_from_url(website: &str) -> Result<String, AppError> {
    let url = url::Url::parse(website)
        .map_err(|e| AppError::BadRequest(format!("website: invalid URL ({})", e)))?;

    url.host_str()
        .map(normalize_domain)
        .ok_or_else(|| AppError::BadRequest("website: URL has no host".to_string()))
}

/// Guesses `name.com` from a company name. Returns `None` when nothing
/// alphanumeric is left.
pub fn slug_domain(name: &str) -> Option<String> {
    let slug: String = name
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect();

    if slug.is_empty() {
        None
    } else {
        Some(format!("{}.com", slug))
    }
}

fn non_empty(field: &str, value: &Option<String>) -> Result<(), AppError> {
    match value {
        Some(v) if v.trim().is_empty() => Err(AppError::BadRequest(format!(
            "{}: must not be empty",
            field
        ))),
        _ => Ok(()),
    }
}

fn check_domain(value: &Option<String>) -> Result<(), AppError> {
    match value {
        Some(d) if !is_valid_domain(d.trim()) => {
            Err(AppError::BadRequest("domain: Invalid domain".to_string()))
        }
        _ => Ok(()),
    }
}

pub fn validate_person_request(req: &PersonEnrichmentRequest) -> Result<(), AppError> {
    if req.email.is_none()
        && req.domain.is_none()
        && req.handle.is_none()
        && req.professional_network_url.is_none()
    {
        return Err(AppError::BadRequest(
            "At least one of email, domain, handle, or professional_network_url is required"
                .to_string(),
        ));
    }

    non_empty("domain", &req.domain)?;
    non_empty("handle", &req.handle)?;
    check_domain(&req.domain)?;

    if let Some(handle) = &req.handle {
        if !is_valid_handle(handle.trim()) {
            return Err(AppError::BadRequest("handle: Invalid handle".to_string()));
        }
    }

    if let Some(email) = &req.email {
        if !is_valid_email(email) {
            return Err(AppError::BadRequest("email: Invalid email".to_string()));
        }
    }
    if let Some(url) = &req.professional_network_url {
        if !is_valid_url(url) {
            return Err(AppError::BadRequest(
                "professional_network_url: Invalid url".to_string(),
            ));
        }
    }

    Ok(())
}

pub fn validate_company_request(req: &CompanyEnrichmentRequest) -> Result<(), AppError> {
    if req.domain.is_none() && req.name.is_none() && req.website.is_none() {
        return Err(AppError::BadRequest(
            "At least one of domain, name, or website is required".to_string(),
        ));
    }

    non_empty("domain", &req.domain)?;
    non_empty("name", &req.name)?;
    check_domain(&req.domain)?;

    if let Some(website) = &req.website {
        if !is_valid_url(website) {
            return Err(AppError::BadRequest("website: Invalid url".to_string()));
        }
    }

    Ok(())
}

pub fn validate_bulk_request(req: &BulkEnrichmentRequest) -> Result<(), AppError> {
    if req.items.is_empty() {
        return Err(AppError::BadRequest(
            "items: at least 1 item is required".to_string(),
        ));
    }
    if req.items.len() > MAX_BULK_ITEMS {
        return Err(AppError::BadRequest(format!(
            "items: at most {} items are allowed",
            MAX_BULK_ITEMS
        )));
    }

    Ok(())
}

/// Parsed and bounded search parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchParams {
    pub domain: String,
    pub limit: usize,
    pub offset: usize,
}

pub fn validate_search_query(query: &SearchPeopleQuery) -> Result<SearchParams, AppError> {
    let domain = match query.domain.as_deref().map(str::trim) {
        Some(d) if is_valid_domain(d) => normalize_domain(d),
        Some(d) if !d.is_empty() => {
            return Err(AppError::BadRequest("domain: Invalid domain".to_string()))
        }
        _ => return Err(AppError::BadRequest("domain: Required".to_string())),
    };

    let limit = match query.limit.as_deref() {
        None => DEFAULT_SEARCH_LIMIT,
        Some(raw) => match raw.parse::<usize>() {
            Ok(n) if (1..=MAX_SEARCH_LIMIT).contains(&n) => n,
            _ => {
                return Err(AppError::BadRequest(format!(
                    "limit: must be an integer between 1 and {}",
                    MAX_SEARCH_LIMIT
                )))
            }
        },
    };

    let offset = match query.offset.as_deref() {
        None => 0,
        Some(raw) => match raw.parse::<usize>() {
            Ok(n) if n <= MAX_SEARCH_OFFSET => n,
            _ => {
                return Err(AppError::BadRequest(format!(
                    "offset: must be an integer between 0 and {}",
                    MAX_SEARCH_OFFSET
                )))
            }
        },
    };

    Ok(SearchParams {
        domain,
        limit,
        offset,
    })
}
