use e2e_tests::{connect, spawn_server};
use mmtp_rs::protocol::packet::TagSet;
use mmtp_rs::protocol::{BuildOptions, TagInput};

const ALICE: &str = "(a)%(x.com)";
const BOB: &str = "(b)%(x.com)";

fn tags(pairs: &[(&str, &[&str])]) -> TagSet {
    pairs
        .iter()
        .map(|(k, vs)| (k.to_string(), vs.iter().map(|v| v.to_string()).collect()))
        .collect()
}

#[tokio::test]
async fn filtered_receive_leaves_the_rest_queued() {
    let server = spawn_server().await;
    let client = connect(&server).await;

    client
        .send_mail(
            ALICE,
            BOB,
            "Sale",
            "Everything must go",
            BuildOptions {
                tags: Some(TagInput::Map(tags(&[("category", &["promotion"])]))),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    client
        .send_mail(ALICE, BOB, "Hello", "Just saying hi", BuildOptions::default())
        .await
        .unwrap();

    let summary = client
        .check_mail(BOB, Some(tags(&[("category", &["promotion", "coupon"])])))
        .await
        .unwrap();
    assert_eq!(summary.total_count, 2);
    assert_eq!(summary.count, 1);
    assert_eq!(summary.tag_counts["category"]["promotion"], 1);

    let matching = client
        .receive_mail_by_tags(BOB, tags(&[("category", &["promotion", "coupon"])]))
        .await
        .unwrap();
    assert_eq!(matching.len(), 1);
    assert_eq!(matching[0].meta.tags["category"], vec!["promotion"]);

    // The untagged message is still queued.
    let rest = client.receive_mail(BOB).await.unwrap();
    assert_eq!(rest.len(), 1);
    assert!(rest[0].meta.tags.is_empty());
}

#[tokio::test]
async fn unknown_closed_tags_are_dropped_at_build_time() {
    let server = spawn_server().await;
    let client = connect(&server).await;

    client
        .send_mail(
            ALICE,
            BOB,
            "Hi",
            "Yo",
            BuildOptions {
                tags: Some(TagInput::Map(tags(&[
                    ("priority", &["urgent", "super-mega-urgent"]),
                    ("custom", &["project-x"]),
                ]))),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let messages = client.receive_mail(BOB).await.unwrap();
    assert_eq!(messages[0].meta.tags["priority"], vec!["urgent"]);
    assert_eq!(messages[0].meta.tags["custom"], vec!["project-x"]);
}

#[tokio::test]
async fn taxonomy_is_served() {
    let server = spawn_server().await;
    let client = connect(&server).await;

    let categories = client.get_tag_categories().await.unwrap();
    assert!(categories["priority"].contains(&"urgent".to_string()));
    assert!(categories["category"].contains(&"promotion".to_string()));
    assert!(categories["status"].contains(&"unread".to_string()));
    assert!(categories.contains_key("custom"));
}
