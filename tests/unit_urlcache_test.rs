use isubench::core::urlcache::{CacheDirective, CacheStore, UrlCache};
use reqwest::header::{
    CACHE_CONTROL, ETAG, HeaderMap, HeaderValue, IF_MODIFIED_SINCE, IF_NONE_MATCH,
};
use std::sync::Arc;

fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (name, value) in pairs {
        map.append(
            reqwest::header::HeaderName::from_static(name),
            HeaderValue::from_static(value),
        );
    }
    map
}

#[tokio::test]
async fn test_entry_from_cacheable_response() {
    let headers = headers(&[
        ("cache-control", "public, max-age=3600"),
        ("etag", "\"abc123\""),
        ("last-modified", "Sat, 01 Jan 2022 00:00:00 GMT"),
    ]);
    let (entry, hash) = UrlCache::from_response(&headers, b"hello");

    let entry = entry.expect("response should be cacheable");
    assert_eq!(entry.etag.as_deref(), Some("\"abc123\""));
    assert_eq!(
        entry.last_modified.as_deref(),
        Some("Sat, 01 Jan 2022 00:00:00 GMT")
    );
    assert!(entry.cache_control.public);
    assert_eq!(entry.md5, hash);
    assert_eq!(hash, format!("{:x}", md5::compute(b"hello")));
}

#[tokio::test]
async fn test_no_directive_refuses_caching() {
    let (entry, hash) = UrlCache::from_response(&HeaderMap::new(), b"body");
    assert!(entry.is_none());
    assert_eq!(hash, format!("{:x}", md5::compute(b"body")));
}

#[tokio::test]
async fn test_no_store_and_no_cache_refuse_caching() {
    for directive in ["no-store", "no-cache", "private, no-cache"] {
        let mut map = HeaderMap::new();
        map.insert(CACHE_CONTROL, HeaderValue::from_str(directive).unwrap());
        let (entry, _) = UrlCache::from_response(&map, b"body");
        assert!(entry.is_none(), "directive {directive:?} must not cache");
    }
}

#[tokio::test]
async fn test_non_public_entry_is_cacheable_but_not_public() {
    let mut map = HeaderMap::new();
    map.insert(CACHE_CONTROL, HeaderValue::from_static("max-age=60"));
    let (entry, _) = UrlCache::from_response(&map, b"body");
    let entry = entry.expect("max-age alone is cacheable");
    assert!(!entry.cache_control.public);
}

#[tokio::test]
async fn test_apply_adds_conditional_headers() {
    let source = headers(&[
        ("cache-control", "public"),
        ("etag", "\"tag\""),
        ("last-modified", "Sat, 01 Jan 2022 00:00:00 GMT"),
    ]);
    let (entry, _) = UrlCache::from_response(&source, b"x");
    let entry = entry.unwrap();

    let mut request = HeaderMap::new();
    entry.apply(&mut request);
    assert_eq!(request.get(IF_NONE_MATCH).unwrap(), "\"tag\"");
    assert_eq!(
        request.get(IF_MODIFIED_SINCE).unwrap(),
        "Sat, 01 Jan 2022 00:00:00 GMT"
    );
}

#[tokio::test]
async fn test_apply_skips_missing_validators() {
    let mut source = HeaderMap::new();
    source.insert(CACHE_CONTROL, HeaderValue::from_static("public"));
    source.insert(ETAG, HeaderValue::from_static("\"only-etag\""));
    let (entry, _) = UrlCache::from_response(&source, b"x");
    let entry = entry.unwrap();

    let mut request = HeaderMap::new();
    entry.apply(&mut request);
    assert!(request.get(IF_NONE_MATCH).is_some());
    assert!(request.get(IF_MODIFIED_SINCE).is_none());
}

#[tokio::test]
async fn test_store_get_set_del() {
    let store = CacheStore::new();
    assert!(store.get("/a").is_none());
    assert!(store.is_empty());

    let mut map = HeaderMap::new();
    map.insert(CACHE_CONTROL, HeaderValue::from_static("public"));
    let (entry, _) = UrlCache::from_response(&map, b"x");
    let entry = Arc::new(entry.unwrap());

    store.set("/a", Arc::clone(&entry));
    assert_eq!(store.len(), 1);
    assert!(store.get("/a").is_some());

    store.del("/a");
    assert!(store.get("/a").is_none());
}

#[tokio::test]
async fn test_directive_parse_is_case_insensitive() {
    let directive = CacheDirective::parse("Public, NO-CACHE");
    assert!(directive.public);
    assert!(directive.no_cache);
    assert!(!directive.no_store);
}
