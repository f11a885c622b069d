// tests/poller_dedup.rs
//
// Poll cycles through the dedup ledger into subscriber queues.

mod common;

use feed_relay::delivery::DropPolicy;
use feed_relay::filter::FilterSpec;
use feed_relay::source::memory::ScriptedSource;

#[tokio::test]
async fn repeated_item_delivered_exactly_once() {
    let src = ScriptedSource::fixed(vec![common::post("p3", "rust", "same post", 1)]);
    let p = common::pipeline(src, 16, DropPolicy::DropOldest);
    let (_id, mut rx) = p.registry.register(FilterSpec::default());

    let c1 = p.poller.poll_once().await.unwrap();
    let c2 = p.poller.poll_once().await.unwrap();
    assert_eq!((c1.fresh, c1.duplicates), (1, 0));
    assert_eq!((c2.fresh, c2.duplicates), (0, 1));

    assert_eq!(rx.try_recv().unwrap().id, "p3");
    assert!(rx.try_recv().is_none());
}

#[tokio::test]
async fn subscriber_registered_after_cycle_sees_next_cycle() {
    let src = ScriptedSource::new()
        .then_posts(vec![common::post("a", "rust", "first", 1)])
        .then_posts(vec![
            common::post("a", "rust", "first", 1),
            common::post("b", "rust", "second", 1),
        ]);
    let p = common::pipeline(src, 16, DropPolicy::DropOldest);

    p.poller.poll_once().await.unwrap();
    let (_id, mut late) = p.registry.register(FilterSpec::default());
    p.poller.poll_once().await.unwrap();

    assert_eq!(late.try_recv().unwrap().id, "b");
    assert!(late.try_recv().is_none(), "a was distributed before registration");
}

#[tokio::test]
async fn unregister_stops_delivery() {
    let src = ScriptedSource::new()
        .then_posts(vec![common::post("a", "rust", "one", 1)])
        .then_posts(vec![common::post("b", "rust", "two", 1)]);
    let p = common::pipeline(src, 16, DropPolicy::DropOldest);
    let (id, mut rx) = p.registry.register(FilterSpec::default());

    p.poller.poll_once().await.unwrap();
    assert!(p.registry.unregister(id));
    let c2 = p.poller.poll_once().await.unwrap();
    assert_eq!(c2.delivered, 0);

    // already-queued items still drain, then the stream ends
    assert_eq!(rx.recv().await.unwrap().id, "a");
    assert!(rx.recv().await.is_none());
}

#[tokio::test]
async fn failing_cycle_does_not_poison_the_ledger() {
    let src = ScriptedSource::new()
        .then_fail("503")
        .then_posts(vec![common::post("a", "rust", "one", 1)]);
    let p = common::pipeline(src, 16, DropPolicy::DropOldest);
    let (_id, mut rx) = p.registry.register(FilterSpec::default());

    assert!(p.poller.poll_once().await.is_err());
    let c = p.poller.poll_once().await.unwrap();
    assert_eq!(c.fresh, 1);
    assert_eq!(rx.try_recv().unwrap().id, "a");
    assert_eq!(p.source.post_calls(), 2);
}

#[tokio::test]
async fn subscribers_get_only_their_matches() {
    let src = ScriptedSource::new().then_posts(vec![
        common::post("t1", "technology", "AI chips", 500),
        common::post("n1", "news", "AI policy", 500),
        common::post("t2", "technology", "keyboards", 500),
    ]);
    let p = common::pipeline(src, 16, DropPolicy::DropOldest);
    let (_a, mut tech_ai) = p.registry.register(FilterSpec {
        source_buckets: Some(vec!["technology".into()]),
        keywords: Some(vec!["ai".into()]),
        ..Default::default()
    });
    let (_b, mut everything) = p.registry.register(FilterSpec::default());

    let c = p.poller.poll_once().await.unwrap();
    assert_eq!(c.delivered, 4);

    assert_eq!(tech_ai.try_recv().unwrap().id, "t1");
    assert!(tech_ai.try_recv().is_none());
    let all: Vec<String> = std::iter::from_fn(|| everything.try_recv())
        .map(|i| i.id.clone())
        .collect();
    assert_eq!(all, vec!["t1", "n1", "t2"]);
}
