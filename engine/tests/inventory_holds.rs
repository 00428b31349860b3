//! Integration tests for inventory holds under contention
//!
//! Holds go through the booking service so pricing, validation and inventory
//! are exercised together.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use ferry_core::booking::SeatRequest;
use ferry_core::environment::Clock;
use ferry_core::error::EngineError;
use ferry_core::types::SeatNumber;
use ferry_engine::booking::BookingService;
use ferry_engine::config::EngineConfig;
use ferry_testing::fixtures::{capacity_sailing, hold_request, hold_request_on, seat_map_sailing, segment};
use ferry_testing::ManualClock;
use futures::future::join_all;
use std::sync::Arc;

// ============================================================================
// Test Fixtures
// ============================================================================

fn service(clock: &ManualClock) -> BookingService {
    BookingService::builder(EngineConfig::default())
        .clock(Arc::new(clock.clone()))
        .build()
        .unwrap()
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn last_place_goes_to_exactly_one_caller() {
    let clock = ManualClock::starting_at_test_epoch();
    let service = Arc::new(service(&clock));
    let sailing = capacity_sailing(2, 1);
    service.register_sailing(sailing.clone()).await.unwrap();

    service.create_hold(hold_request(&sailing, 1)).await.unwrap();

    let first = service.create_hold(hold_request(&sailing, 1));
    let second = service.create_hold(hold_request(&sailing, 1));
    let (first, second) = tokio::join!(first, second);

    let won = [&first, &second].iter().filter(|result| result.is_ok()).count();
    assert_eq!(won, 1, "exactly one of two racing holds may take the last place");
    let lost = if first.is_err() { first } else { second };
    assert!(matches!(
        lost,
        Err(EngineError::CapacityExhausted { requested: 1, available: 0 })
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_holds_never_oversell() {
    let clock = ManualClock::starting_at_test_epoch();
    let service = Arc::new(service(&clock));
    let sailing = capacity_sailing(10, 3);
    service.register_sailing(sailing.clone()).await.unwrap();

    let handles = (0..100).map(|_| {
        let service = Arc::clone(&service);
        let request = hold_request(&sailing, 1);
        tokio::spawn(async move { service.create_hold(request).await })
    });

    let mut held = 0;
    let mut refused = 0;
    for outcome in join_all(handles).await {
        match outcome.unwrap() {
            Ok(_) => held += 1,
            Err(EngineError::CapacityExhausted { .. }) => refused += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(held, 10);
    assert_eq!(refused, 90);
    let availability = service
        .availability(sailing.id, segment(0, 3))
        .await
        .unwrap();
    assert_eq!(availability.free, 0);
}

#[tokio::test]
async fn chosen_seat_cannot_be_held_twice_on_overlapping_segments() {
    let clock = ManualClock::starting_at_test_epoch();
    let service = service(&clock);
    let sailing = seat_map_sailing(4, 3);
    service.register_sailing(sailing.clone()).await.unwrap();

    let seat = SeatNumber::new("A-2");
    let mut request = hold_request_on(&sailing, segment(0, 2), 1);
    request.seats = SeatRequest::Seats(vec![seat.clone()]);
    let booking = service.create_hold(request).await.unwrap();
    assert_eq!(booking.seats, vec![seat.clone()]);

    let mut overlapping = hold_request_on(&sailing, segment(1, 3), 1);
    overlapping.seats = SeatRequest::Seats(vec![seat.clone()]);
    let result = service.create_hold(overlapping).await;
    assert_eq!(
        result,
        Err(EngineError::SeatConflict {
            seat: "A-2".to_string()
        })
    );

    // The same seat is free again once the passenger has left
    let mut later = hold_request_on(&sailing, segment(2, 3), 1);
    later.seats = SeatRequest::Seats(vec![seat]);
    assert!(service.create_hold(later).await.is_ok());
}

#[tokio::test]
async fn overlapping_segments_share_the_busiest_leg() {
    let clock = ManualClock::starting_at_test_epoch();
    let service = service(&clock);
    let sailing = capacity_sailing(3, 3);
    service.register_sailing(sailing.clone()).await.unwrap();

    service
        .create_hold(hold_request_on(&sailing, segment(0, 2), 2))
        .await
        .unwrap();

    let middle = service.availability(sailing.id, segment(1, 2)).await.unwrap();
    assert_eq!(middle.free, 1);
    let last_leg = service.availability(sailing.id, segment(2, 3)).await.unwrap();
    assert_eq!(last_leg.free, 3);

    let result = service
        .create_hold(hold_request_on(&sailing, segment(1, 3), 2))
        .await;
    assert!(matches!(
        result,
        Err(EngineError::CapacityExhausted { requested: 2, available: 1 })
    ));
}

#[tokio::test]
async fn lapsed_hold_frees_its_places() {
    let clock = ManualClock::starting_at_test_epoch();
    let service = service(&clock);
    let sailing = capacity_sailing(1, 1);
    service.register_sailing(sailing.clone()).await.unwrap();

    service.create_hold(hold_request(&sailing, 1)).await.unwrap();
    assert!(service.create_hold(hold_request(&sailing, 1)).await.is_err());

    clock.advance(chrono::Duration::minutes(10));
    let booking = service.create_hold(hold_request(&sailing, 1)).await.unwrap();
    assert_eq!(booking.hold_expires_at, clock.now() + chrono::Duration::minutes(10));
}

#[tokio::test]
async fn sweeper_reclaims_without_a_caller() {
    let clock = ManualClock::starting_at_test_epoch();
    let service = service(&clock);
    let sailing = capacity_sailing(5, 2);
    service.register_sailing(sailing.clone()).await.unwrap();

    service.create_hold(hold_request(&sailing, 2)).await.unwrap();
    service.create_hold(hold_request(&sailing, 1)).await.unwrap();

    assert_eq!(service.inventory().sweep().await, 0);
    clock.advance(chrono::Duration::minutes(11));
    assert_eq!(service.inventory().sweep().await, 2);
}

#[tokio::test]
async fn oversized_ttl_is_a_validation_error() {
    let clock = ManualClock::starting_at_test_epoch();
    let service = service(&clock);
    let sailing = capacity_sailing(2, 1);
    service.register_sailing(sailing.clone()).await.unwrap();

    let mut request = hold_request(&sailing, 1);
    request.ttl = Some(std::time::Duration::from_secs(10_000_000_000_000));
    let result = service.create_hold(request).await;

    assert!(matches!(result, Err(EngineError::Validation(_))));
    assert!(service.create_hold(hold_request(&sailing, 2)).await.is_ok());
}
