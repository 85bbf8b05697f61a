//! Tests for Zotero item mapping, the HTTP client and the import flow.
//! Network calls go to a local wiremock server.

use super::*;
use serde_json::json;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ============================================================================
// Helpers
// ============================================================================

fn config() -> ZoteroConfig {
    ZoteroConfig {
        user_id: "42".to_string(),
        api_key: "secret-key".to_string(),
        library_type: LibraryType::User,
        last_sync: None,
        updated_at: Utc::now(),
    }
}

fn item(key: &str, title: &str, tags: &[&str]) -> Value {
    item_with_doi(key, title, tags, &format!("10.1145/{}", key))
}

fn item_with_doi(key: &str, title: &str, tags: &[&str], doi: &str) -> Value {
    json!({
        "key": key,
        "version": 12,
        "data": {
            "key": key,
            "itemType": "journalArticle",
            "title": title,
            "creators": [
                {"creatorType": "author", "firstName": "Barbara", "lastName": "Liskov"},
                {"creatorType": "author", "name": "ACM Working Group"}
            ],
            "date": "1987-10-04",
            "publicationTitle": "SIGPLAN Notices",
            "journalAbbreviation": "SIGPLAN Not.",
            "DOI": doi,
            "url": "https://dl.acm.org/doi/10.1145/62139.62141",
            "abstractNote": "Data abstraction and hierarchy.",
            "tags": tags.iter().map(|t| json!({"tag": t})).collect::<Vec<_>>()
        }
    })
}

fn items_response(items: Vec<Value>, total: usize) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("Total-Results", total.to_string().as_str())
        .insert_header("Last-Modified-Version", "812")
        .set_body_json(items)
}

// ============================================================================
// Mapping
// ============================================================================

#[test]
fn test_item_to_paper_maps_fields() {
    let input = item_to_paper(&item("ABCD1234", "Data Abstraction", &["types", " "])).unwrap();
    assert_eq!(input.title.as_deref(), Some("Data Abstraction"));
    assert_eq!(
        input.authors.as_deref(),
        Some("Barbara Liskov, ACM Working Group")
    );
    assert_eq!(input.conference.as_deref(), Some("SIGPLAN Notices"));
    assert_eq!(input.conference_short.as_deref(), Some("SIGPLAN Not."));
    assert_eq!(input.year, Some(1987));
    assert_eq!(input.month, Some(10));
    assert_eq!(input.doi.as_deref(), Some("10.1145/ABCD1234"));
    assert_eq!(input.zotero_key.as_deref(), Some("ABCD1234"));
    assert_eq!(input.tags, vec!["types"]);
}

#[test]
fn test_item_to_paper_defaults_and_drops_invalid() {
    let raw = json!({
        "key": "K1",
        "data": {
            "itemType": "thesis",
            "university": "MIT",
            "date": "Spring 2003",
            "DOI": "not-a-doi",
            "url": "ftp://example.org/file"
        }
    });
    let input = item_to_paper(&raw).unwrap();
    assert_eq!(input.title.as_deref(), Some("Untitled"));
    assert_eq!(input.authors.as_deref(), Some("Unknown author"));
    assert_eq!(input.conference.as_deref(), Some("MIT"));
    assert_eq!(input.year, Some(2003));
    assert_eq!(input.month, None);
    assert_eq!(input.doi, None);
    assert_eq!(input.url, None);

    assert!(item_to_paper(&json!({"data": {}})).is_none());
}

// ============================================================================
// Client
// ============================================================================

#[tokio::test]
async fn test_connection_reports_invalid_key() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/users/42/items"))
        .and(header("Zotero-API-Key", "bad"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/users/42/items"))
        .and(header("Zotero-API-Key", "secret-key"))
        .and(query_param("limit", "1"))
        .respond_with(items_response(vec![], 0))
        .mount(&server)
        .await;

    let client = ZoteroClient::new(&server.uri()).unwrap();
    let bad = ZoteroCredentials {
        user_id: "42".to_string(),
        api_key: "bad".to_string(),
        library_type: LibraryType::User,
    };
    let err = client.test_connection(Account::from(&bad)).await.unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    let cfg = config();
    let version = client.test_connection(Account::from(&cfg)).await.unwrap();
    assert_eq!(version, Some(812));
}

#[tokio::test]
async fn test_fetch_items_follows_pages() {
    let server = MockServer::start().await;
    let first: Vec<Value> = (0..100).map(|i| item(&format!("A{:03}", i), "t", &[])).collect();
    let second: Vec<Value> = (0..50).map(|i| item(&format!("B{:03}", i), "t", &[])).collect();

    Mock::given(method("GET"))
        .and(path("/users/42/items"))
        .and(query_param("start", "0"))
        .and(query_param("limit", "100"))
        .respond_with(items_response(first, 150))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/users/42/items"))
        .and(query_param("start", "100"))
        .respond_with(items_response(second, 150))
        .expect(1)
        .mount(&server)
        .await;

    let client = ZoteroClient::new(&server.uri()).unwrap();
    let cfg = config();
    let page = client
        .fetch_items(
            Account::from(&cfg),
            &ItemQuery {
                limit: Some(1000),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(page.items.len(), 150);
    assert_eq!(page.total, 150);
    assert_eq!(page.library_version, Some(812));
}

#[tokio::test]
async fn test_fetch_items_respects_small_limit_and_filters() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/groups/7/items"))
        .and(query_param("limit", "5"))
        .and(query_param("tag", "ml"))
        .and(query_param("itemType", "book"))
        .respond_with(items_response(
            (0..5).map(|i| item(&format!("K{}", i), "t", &[])).collect(),
            40,
        ))
        .expect(1)
        .mount(&server)
        .await;

    let client = ZoteroClient::new(&server.uri()).unwrap();
    let account = Account {
        user_id: "7",
        api_key: "k",
        library_type: LibraryType::Group,
    };
    let page = client
        .fetch_items(
            account,
            &ItemQuery {
                limit: Some(5),
                tag: Some("ml".to_string()),
                item_type: Some("book".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(page.items.len(), 5);
    assert_eq!(page.total, 40);
}

#[tokio::test]
async fn test_fetch_collections() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/users/42/collections"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"key": "C1", "data": {"name": "Thesis", "parentCollection": false}, "meta": {"numItems": 3}},
            {"key": "C2", "data": {"name": "Chapter 1", "parentCollection": "C1"}, "meta": {}}
        ])))
        .mount(&server)
        .await;

    let client = ZoteroClient::new(&server.uri()).unwrap();
    let cfg = config();
    let collections = client.fetch_collections(Account::from(&cfg)).await.unwrap();
    assert_eq!(collections.len(), 2);
    assert_eq!(collections[0].parent_key, None);
    assert_eq!(collections[0].num_items, 3);
    assert_eq!(collections[1].parent_key.as_deref(), Some("C1"));
}

// ============================================================================
// Import
// ============================================================================

#[tokio::test]
async fn test_import_counts_every_requested_key() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/users/42/items"))
        .respond_with(items_response(
            vec![
                item("AAAA1111", "With PDF", &["Types", "new-tag"]),
                item("BBBB2222", "Without PDF", &[]),
            ],
            2,
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/users/42/items/AAAA1111/children"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"key": "NOTE0001", "data": {"itemType": "note"}},
            {"key": "ATT00001", "data": {"itemType": "attachment", "contentType": "application/pdf"}}
        ])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/users/42/items/ATT00001/file"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"%PDF-1.4 fake".to_vec()))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/users/42/items/BBBB2222/children"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let tmp = tempfile::tempdir().unwrap();
    let store = Store::temporary().unwrap();
    let library = Library::new(tmp.path().join("MyPapers"), tmp.path().join("uploads"));
    library.ensure_dirs().unwrap();
    store.create_tag(&crate::models::TagInput {
        name: Some("types".to_string()),
        color: Some("#ff0000".to_string()),
    })
    .unwrap();
    store.save_zotero_config(&config()).unwrap();

    let client = ZoteroClient::new(&server.uri()).unwrap();
    let keys: Vec<String> = ["AAAA1111", "BBBB2222", "MISSING0", "AAAA1111"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let report = import_items(&client, &store, &library, &config(), &keys)
        .await
        .unwrap();

    assert_eq!(report.imported + report.errors, keys.len());
    assert_eq!(report.imported, 2);
    assert_eq!(report.errors, 2);
    let errors: Vec<&str> = report.details.errors.iter().map(|e| e.key.as_str()).collect();
    assert_eq!(errors, vec!["MISSING0", "AAAA1111"]);

    let paper = store.find_by_zotero_key("AAAA1111").unwrap().unwrap();
    assert_eq!(paper.authors, "Barbara Liskov, ACM Working Group");
    assert!(paper.folder_path.is_some());
    assert!(library.pdf_path(&paper).is_some());

    // existing tag matched case-insensitively, missing one created
    let tags = store.tags_for_paper(paper.id).unwrap();
    let names: Vec<&str> = tags.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["new-tag", "types"]);
    assert_eq!(tags[1].color, "#ff0000");

    assert!(store.zotero_config().unwrap().unwrap().last_sync.is_some());
}

#[tokio::test]
async fn test_import_attaches_pdf_and_derives_cover() {
    let pdf = crate::pdf::fixtures::sample_pdf(&["Data Abstraction and Hierarchy"], 120);
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/users/42/items"))
        .respond_with(items_response(vec![item("COVR0001", "Data Abstraction", &[])], 1))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/users/42/items/COVR0001/children"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"key": "ATT00002", "data": {"itemType": "attachment", "contentType": "application/pdf"}}
        ])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/users/42/items/ATT00002/file"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(pdf.clone()))
        .expect(1)
        .mount(&server)
        .await;

    let tmp = tempfile::tempdir().unwrap();
    let store = Store::temporary().unwrap();
    let library = Library::new(tmp.path().join("MyPapers"), tmp.path().join("uploads"));
    library.ensure_dirs().unwrap();
    store.save_zotero_config(&config()).unwrap();

    let client = ZoteroClient::new(&server.uri()).unwrap();
    let report = import_items(&client, &store, &library, &config(), &["COVR0001".to_string()])
        .await
        .unwrap();
    assert_eq!(report.imported, 1);

    let paper = store.find_by_zotero_key("COVR0001").unwrap().unwrap();
    let stored = library.pdf_path(&paper).unwrap();
    assert_eq!(std::fs::read(&stored).unwrap(), pdf);

    let cover = paper.image.clone().unwrap();
    let cover_name = format!("paper_Cover_{}.png", paper.id);
    assert!(cover.ends_with(&cover_name));
    let folder = stored.parent().unwrap();
    assert!(folder.join(&cover_name).is_file());
    assert!(!folder.join("temp_extract").exists());
}

#[tokio::test]
async fn test_import_second_paper_with_same_doi_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/users/42/items"))
        .respond_with(items_response(
            vec![
                item_with_doi("DUP00001", "One", &[], "10.1000/same"),
                item_with_doi("DUP00002", "Two", &[], "10.1000/same"),
            ],
            2,
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/users/42/items/DUP00001/children"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let tmp = tempfile::tempdir().unwrap();
    let store = Store::temporary().unwrap();
    let library = Library::new(tmp.path().join("MyPapers"), tmp.path().join("uploads"));
    let client = ZoteroClient::new(&server.uri()).unwrap();

    let keys = vec!["DUP00001".to_string(), "DUP00002".to_string()];
    let report = import_items(&client, &store, &library, &config(), &keys)
        .await
        .unwrap();
    assert_eq!(report.imported, 1);
    assert_eq!(report.errors, 1);
    assert!(report.details.errors[0].error.contains("DOI"));
}

#[tokio::test]
async fn test_import_report_survives_sync_time_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/users/42/items"))
        .respond_with(items_response(vec![item("SYNC0001", "Kept", &[])], 1))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/users/42/items/SYNC0001/children"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    // an unreadable stored config makes recording the sync time fail
    let tmp = tempfile::tempdir().unwrap();
    let db_path = tmp.path().join("db");
    {
        let db = sled::open(&db_path).unwrap();
        db.open_tree("meta")
            .unwrap()
            .insert("zotero_config", b"{not json".as_slice())
            .unwrap();
        db.flush().unwrap();
    }
    let store = Store::open(&db_path).unwrap();
    assert!(store.touch_zotero_sync().is_err());

    let library = Library::new(tmp.path().join("MyPapers"), tmp.path().join("uploads"));
    let client = ZoteroClient::new(&server.uri()).unwrap();
    let keys = vec!["SYNC0001".to_string()];
    let report = import_items(&client, &store, &library, &config(), &keys)
        .await
        .unwrap();

    assert_eq!(report.imported, 1);
    assert_eq!(report.errors, 0);
    assert!(store.find_by_zotero_key("SYNC0001").unwrap().is_some());
}
