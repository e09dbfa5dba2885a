//! Itinerary search request construction.

use crate::transport::SearchQuery;
use farescout_browser::CredentialBundle;
use farescout_core::SearchType;
use serde_json::{json, Value};

/// Headers sent in this order when present; anything else follows.
const HEADER_ORDER: [&str; 10] = [
    "user-agent",
    "accept",
    "accept-language",
    "content-type",
    "referer",
    "x-xsrf-token",
    "x-cid",
    "origin",
    "sec-fetch-dest",
    "sec-fetch-mode",
];

/// Headers never replayed from a captured browser session.
const SKIPPED_HEADERS: [&str; 5] = [
    "host",
    "content-length",
    "connection",
    "cookie",
    "accept-encoding",
];

/// Build the JSON body for a one-way itinerary search.
pub fn build_search_payload(search_type: SearchType, query: &SearchQuery) -> Value {
    let revenue = search_type == SearchType::Revenue;
    let udo = if revenue {
        json!({ "search_method": "Lowest" })
    } else {
        json!({})
    };

    json!({
        "metadata": {
            "selectedProducts": [],
            "tripType": "OneWay",
            "udo": udo,
        },
        "passengers": [{ "type": "adult", "count": query.passengers }],
        "requestHeader": { "clientId": "AAcom" },
        "slices": [{
            "allCarriers": true,
            "cabin": "",
            "connectionCity": null,
            "departureDate": query.date.to_string(),
            "destination": query.destination.as_str(),
            "destinationNearbyAirports": false,
            "maxStops": null,
            "origin": query.origin.as_str(),
            "originNearbyAirports": false,
        }],
        "tripOptions": {
            "corporateBooking": false,
            "fareType": "Lowest",
            "locale": "en_US",
            "pointOfSale": "",
            "searchType": search_type.as_str(),
        },
        "loyaltyInfo": null,
        "version": if revenue { "cfr" } else { "" },
        "queryParams": {
            "sliceIndex": 0,
            "sessionId": "",
            "solutionSet": "",
            "solutionId": "",
            "sort": "CARRIER",
        },
    })
}

/// Build the ordered request headers for a credential bundle.
///
/// Header names are lowercase. Captured headers are replayed, the bundle's
/// referer and user agent win, and the anti-CSRF headers are derived from
/// cookies when the browser did not capture them.
pub fn build_headers(bundle: &CredentialBundle, origin: &str) -> Vec<(String, String)> {
    let mut headers: Vec<(String, String)> = vec![
        ("user-agent".into(), bundle.user_agent.clone()),
        ("accept".into(), "application/json, text/plain, */*".into()),
        ("accept-language".into(), "en-US,en;q=0.9".into()),
        ("content-type".into(), "application/json".into()),
        ("origin".into(), origin.to_string()),
        ("sec-fetch-dest".into(), "empty".into()),
        ("sec-fetch-mode".into(), "cors".into()),
        ("sec-fetch-site".into(), "same-origin".into()),
    ];
    if !bundle.referer.is_empty() {
        headers.push(("referer".into(), bundle.referer.clone()));
    }

    for (name, value) in &bundle.headers {
        let name = name.to_ascii_lowercase();
        if name.starts_with(':') || SKIPPED_HEADERS.contains(&name.as_str()) {
            continue;
        }
        if matches!(name.as_str(), "referer" | "user-agent") {
            continue;
        }
        set_header(&mut headers, name, value.clone());
    }

    if let Some(token) = bundle.cookie("XSRF-TOKEN") {
        add_header_if_absent(&mut headers, "x-xsrf-token", token);
    }
    if let Some(session) = bundle.cookie("spa_session_id") {
        add_header_if_absent(&mut headers, "x-cid", session);
    }

    headers.sort_by_key(|(name, _)| {
        HEADER_ORDER
            .iter()
            .position(|ordered| *ordered == name.as_str())
            .unwrap_or(HEADER_ORDER.len())
    });
    headers
}

fn set_header(headers: &mut Vec<(String, String)>, name: String, value: String) {
    match headers.iter_mut().find(|(existing, _)| *existing == name) {
        Some((_, existing)) => *existing = value,
        None => headers.push((name, value)),
    }
}

fn add_header_if_absent(headers: &mut Vec<(String, String)>, name: &str, value: &str) {
    if !headers.iter().any(|(existing, _)| existing == name) {
        headers.push((name.to_string(), value.to_string()));
    }
}
