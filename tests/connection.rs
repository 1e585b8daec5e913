use std::time::Duration;

use tokio::time::timeout;

use unibus::{ClaimOptions, MatchRule, Value};

mod common;

use common::{FakeBus, BUS_NAME, BUS_PATH};

const TICK: Duration = Duration::from_millis(500);

async fn recv(claim: &mut unibus::Claim) -> Option<bool> {
    timeout(TICK, claim.recv()).await.expect("claim update")
}

#[tokio::test]
async fn connect_and_ping() {
    let bus = FakeBus::new();
    let connection = bus.connect().await.unwrap();

    assert_eq!(connection.unique_name(), ":1.1");
    assert!(connection.supports_unix_fd());
    assert_eq!(connection.server_guid(), "746573742d6775696400");

    // An empty-bodied round trip matched back to its serial.
    connection.ping(BUS_NAME, BUS_PATH).await.unwrap();
    assert_eq!(connection.get_id().await.unwrap(), "fake-bus-0");
}

#[tokio::test]
async fn concurrent_calls_resolve_by_serial() {
    let bus = FakeBus::new();
    let connection = bus.connect().await.unwrap();

    // Mix slow and fast calls; each resolves against its own serial even
    // though the replies arrive out of order relative to issue order.
    let slow = connection.call::<_, (String,)>(BUS_NAME, BUS_PATH, "org.example", "Slow", ());
    let fast = (0..8).map(|_| connection.get_id());

    let (slow, fast) = tokio::join!(
        slow,
        futures::future::try_join_all(fast),
    );

    assert_eq!(slow.unwrap().0, "late");
    assert!(fast.unwrap().iter().all(|id| id == "fake-bus-0"));
}

#[tokio::test]
async fn unknown_method_is_a_call_error() {
    let bus = FakeBus::new();
    let connection = bus.connect().await.unwrap();

    let error = connection
        .call::<_, ()>(BUS_NAME, BUS_PATH, "org.example.Missing", "Nope", ())
        .await
        .unwrap_err();

    assert_eq!(
        error.error_name(),
        Some("org.freedesktop.DBus.Error.UnknownMethod")
    );
}

#[tokio::test]
async fn abandoned_call_drops_late_reply() {
    let bus = FakeBus::new();
    let connection = bus.connect().await.unwrap();

    // Give up on a reply that arrives 200ms later.
    let slow = connection.call::<_, (String,)>(BUS_NAME, BUS_PATH, "org.example", "Slow", ());
    assert!(timeout(Duration::from_millis(20), slow).await.is_err());

    // The late reply must not leak into an unrelated call.
    tokio::time::sleep(Duration::from_millis(250)).await;
    connection.ping(BUS_NAME, BUS_PATH).await.unwrap();
}

#[tokio::test]
async fn close_fails_pending_calls() {
    let bus = FakeBus::new();
    let connection = bus.connect().await.unwrap();

    let pending = {
        let connection = connection.clone();
        tokio::spawn(async move {
            connection
                .call::<_, (String,)>(BUS_NAME, BUS_PATH, "org.example", "Slow", ())
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    connection.close();

    let error = pending.await.unwrap().unwrap_err();
    assert!(error.is_closed());
    assert!(connection.is_closed());

    // Closing again is a no-op, and further calls fail immediately.
    connection.close();
    assert!(connection.ping(BUS_NAME, BUS_PATH).await.unwrap_err().is_closed());
}

#[tokio::test]
async fn watcher_routes_only_matching_signals() {
    let bus = FakeBus::new();
    let connection = bus.connect().await.unwrap();

    let mut names = connection.watcher();
    names
        .add_match(
            MatchRule::signal()
                .with_interface(BUS_NAME)
                .with_member("NameOwnerChanged")
                .with_arg(0, "org.test.One"),
        )
        .await
        .unwrap();

    let mut other = connection.watcher();
    other
        .add_match(
            MatchRule::signal()
                .with_interface(BUS_NAME)
                .with_member("NameOwnerChanged")
                .with_arg(0, "org.test.Two"),
        )
        .await
        .unwrap();

    bus.broadcast_name_owner_changed("org.test.One", "", ":1.9");
    connection.ping(BUS_NAME, BUS_PATH).await.unwrap();

    let notification = timeout(TICK, names.next()).await.unwrap().unwrap();
    assert_eq!(notification.member.as_deref(), Some("NameOwnerChanged"));
    assert_eq!(notification.sender.as_deref(), Some(BUS_NAME));
    assert_eq!(notification.body[0], Value::String("org.test.One".into()));
    assert!(!notification.overflow);

    // The other watcher saw nothing.
    assert!(timeout(Duration::from_millis(50), other.next()).await.is_err());
}

#[tokio::test]
async fn watcher_overflow_marks_twentieth() {
    let bus = FakeBus::new();
    let connection = bus.connect().await.unwrap();

    let mut watcher = connection.watcher();
    let guard = watcher
        .add_match(
            MatchRule::signal()
                .with_interface(BUS_NAME)
                .with_member("NameOwnerChanged"),
        )
        .await
        .unwrap();

    // 25 matching signals with no consumer reads.
    for n in 0..25 {
        bus.broadcast_name_owner_changed("org.test.Bus", "", &format!(":1.{n}"));
    }

    // The ping reply trails the signals, so once it resolves they have all
    // been dispatched.
    connection.ping(BUS_NAME, BUS_PATH).await.unwrap();

    let mut received = Vec::new();

    for _ in 0..20 {
        received.push(timeout(TICK, watcher.next()).await.unwrap().unwrap());
    }

    for notification in &received[..19] {
        assert!(!notification.overflow);
    }

    assert!(received[19].overflow);
    assert_eq!(received[19].body[2], Value::String(":1.19".into()));

    // No 21st notification is delivered.
    assert!(timeout(Duration::from_millis(50), watcher.next()).await.is_err());

    guard.remove().await.unwrap();
    guard.remove().await.unwrap();
    watcher.close().await;
    watcher.close().await;
}

#[tokio::test]
async fn name_succession() {
    let bus = FakeBus::new();
    let a = bus.connect().await.unwrap();
    let b = bus.connect().await.unwrap();

    let mut claim_a = a.claim("org.test.Bus", ClaimOptions::new()).await.unwrap();
    assert_eq!(recv(&mut claim_a).await, Some(true));
    assert!(claim_a.is_owner());

    let mut claim_b = b.claim("org.test.Bus", ClaimOptions::new()).await.unwrap();
    assert_eq!(recv(&mut claim_b).await, Some(false));

    assert_eq!(
        a.list_queued_owners("org.test.Bus").await.unwrap(),
        vec![a.unique_name().to_owned(), b.unique_name().to_owned()]
    );

    claim_a.close().await.unwrap();
    assert_eq!(claim_a.recv().await, Some(false));
    assert_eq!(claim_a.recv().await, None);

    assert_eq!(recv(&mut claim_b).await, Some(true));
    assert!(claim_b.is_owner());

    // Closing a closed claim is a no-op.
    claim_a.close().await.unwrap();
}

#[tokio::test]
async fn forced_replacement() {
    let bus = FakeBus::new();
    let a = bus.connect().await.unwrap();
    let b = bus.connect().await.unwrap();
    let c = bus.connect().await.unwrap();

    // A holds the name without allowing replacement.
    let mut claim_a = a.claim("org.test.Bus", ClaimOptions::new()).await.unwrap();
    assert_eq!(recv(&mut claim_a).await, Some(true));

    // B cannot take it, even when trying to replace.
    let mut claim_b = b
        .claim("org.test.Bus", ClaimOptions::new().try_replace(true))
        .await
        .unwrap();
    assert_eq!(recv(&mut claim_b).await, Some(false));

    // A relaxes its hold without giving the name up.
    claim_a
        .request(ClaimOptions::new().allow_replacement(true))
        .await
        .unwrap();

    // Now C displaces A.
    let mut claim_c = c
        .claim(
            "org.test.Bus",
            ClaimOptions::new().allow_replacement(true).try_replace(true),
        )
        .await
        .unwrap();

    assert_eq!(recv(&mut claim_c).await, Some(true));
    assert_eq!(recv(&mut claim_a).await, Some(false));

    assert_eq!(
        a.list_queued_owners("org.test.Bus").await.unwrap(),
        vec![
            c.unique_name().to_owned(),
            a.unique_name().to_owned(),
            b.unique_name().to_owned(),
        ]
    );

    // B takes its turn by replacing C.
    claim_b
        .request(ClaimOptions::new().try_replace(true))
        .await
        .unwrap();

    assert_eq!(recv(&mut claim_b).await, Some(true));
    assert_eq!(recv(&mut claim_c).await, Some(false));

    assert_eq!(
        a.list_queued_owners("org.test.Bus").await.unwrap(),
        vec![
            b.unique_name().to_owned(),
            c.unique_name().to_owned(),
            a.unique_name().to_owned(),
        ]
    );
}

#[tokio::test]
async fn rejected_claim_fails() {
    let bus = FakeBus::new();
    let a = bus.connect().await.unwrap();
    let b = bus.connect().await.unwrap();

    let mut claim_a = a.claim("org.test.Bus", ClaimOptions::new()).await.unwrap();
    assert_eq!(recv(&mut claim_a).await, Some(true));

    let error = b
        .claim("org.test.Bus", ClaimOptions::new().no_queue(true))
        .await
        .unwrap_err();

    assert!(error.to_string().contains("org.test.Bus"));
}

#[tokio::test]
async fn connection_close_cascades_to_watchers_and_claims() {
    let bus = FakeBus::new();
    let connection = bus.connect().await.unwrap();

    let mut watcher = connection.watcher();
    watcher
        .add_match(MatchRule::signal().with_interface(BUS_NAME))
        .await
        .unwrap();

    let mut claim = connection
        .claim("org.test.Bus", ClaimOptions::new())
        .await
        .unwrap();
    assert_eq!(recv(&mut claim).await, Some(true));

    connection.close();

    // The watcher terminates cleanly after draining.
    loop {
        match timeout(TICK, watcher.next()).await.expect("watcher close") {
            Some(_) => continue,
            None => break,
        }
    }

    // The claim observes the lost state.
    loop {
        match timeout(TICK, claim.recv()).await.expect("claim close") {
            Some(true) => continue,
            Some(false) => break,
            None => panic!("claim channel ended without a final state"),
        }
    }
}
