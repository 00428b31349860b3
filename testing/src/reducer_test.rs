//! Given-When-Then harness for reducers
//!
//! A scenario is either accepted (state and effects are checked) or refused
//! (the error is checked and the state must be exactly what it was).
//!
//! ```ignore
//! use ferry_testing::ReducerTest;
//!
//! let booking = ReducerTest::new(BookingReducer::new(), env())
//!     .given(holding_booking())
//!     .when(BookingAction::Cancel { reason: "changed plans".into() })
//!     .expect_effects([BookingEffect::ReleaseInventory, BookingEffect::AbandonPayment])
//!     .expect_state(|booking| assert_eq!(booking.status, BookingStatus::Cancelled))
//!     .run();
//! ```

#![allow(clippy::module_name_repetitions)] // ReducerTest is the natural name

use ferry_core::reducer::Reducer;
use std::fmt::Debug;

type Check<T> = Box<dyn FnOnce(&T)>;

enum Expectation<R: Reducer> {
    Accepted {
        effects: Option<Vec<R::Effect>>,
        state: Vec<Check<R::State>>,
    },
    Refused(Check<R::Error>),
}

/// One scenario against a reducer
pub struct ReducerTest<R: Reducer> {
    reducer: R,
    env: R::Environment,
    given: Option<R::State>,
    when: Option<R::Action>,
    expectation: Expectation<R>,
}

impl<R> ReducerTest<R>
where
    R: Reducer,
    R::State: Clone + PartialEq + Debug,
    R::Effect: PartialEq + Debug,
    R::Error: Debug,
{
    /// Scenario for `reducer` running in `env`; accepted with no checks until told otherwise
    #[must_use]
    pub fn new(reducer: R, env: R::Environment) -> Self {
        Self {
            reducer,
            env,
            given: None,
            when: None,
            expectation: Expectation::Accepted {
                effects: None,
                state: Vec::new(),
            },
        }
    }

    /// Starting state
    #[must_use]
    pub fn given(mut self, state: R::State) -> Self {
        self.given = Some(state);
        self
    }

    /// Action under test
    #[must_use]
    pub fn when(mut self, action: R::Action) -> Self {
        self.when = Some(action);
        self
    }

    /// Exact effects, in order
    #[must_use]
    pub fn expect_effects(mut self, expected: impl IntoIterator<Item = R::Effect>) -> Self {
        if let Expectation::Accepted { effects, .. } = &mut self.expectation {
            *effects = Some(expected.into_iter().collect());
        }
        self
    }

    /// Check on the resulting state
    #[must_use]
    pub fn expect_state(mut self, check: impl FnOnce(&R::State) + 'static) -> Self {
        if let Expectation::Accepted { state, .. } = &mut self.expectation {
            state.push(Box::new(check));
        }
        self
    }

    /// The action must be refused; `check` inspects the error
    #[must_use]
    pub fn expect_refusal(mut self, check: impl FnOnce(&R::Error) + 'static) -> Self {
        self.expectation = Expectation::Refused(Box::new(check));
        self
    }

    /// Runs the scenario and returns the resulting state
    ///
    /// # Panics
    ///
    /// Panics if the starting state or action is missing, or if any
    /// expectation fails.
    #[allow(clippy::panic)] // Test harness
    pub fn run(self) -> R::State {
        let Some(mut state) = self.given else {
            panic!("no starting state, call given()");
        };
        let Some(action) = self.when else {
            panic!("no action, call when()");
        };
        let before = state.clone();

        match (self.reducer.reduce(&mut state, action, &self.env), self.expectation) {
            (Ok(produced), Expectation::Accepted { effects, state: checks }) => {
                if let Some(expected) = effects {
                    assert_eq!(produced.as_slice(), expected.as_slice(), "unexpected effects");
                }
                for check in checks {
                    check(&state);
                }
            }
            (Err(error), Expectation::Refused(check)) => {
                assert_eq!(state, before, "a refused action changed the state");
                check(&error);
            }
            (Ok(produced), Expectation::Refused(_)) => {
                panic!("expected a refusal, the action was accepted with {produced:?}");
            }
            (Err(error), Expectation::Accepted { .. }) => {
                panic!("action refused unexpectedly: {error:?}");
            }
        }
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_core::{SmallVec, smallvec};

    #[derive(Clone, Debug, PartialEq)]
    struct Deck {
        places: u32,
    }

    #[derive(Debug)]
    enum Boarding {
        Board(u32),
        Disembark(u32),
    }

    #[derive(Debug, PartialEq)]
    enum Announcement {
        Boarded(u32),
    }

    #[derive(Debug, PartialEq)]
    struct DeckFull;

    struct DeckReducer;

    impl Reducer for DeckReducer {
        type State = Deck;
        type Action = Boarding;
        type Environment = ();
        type Effect = Announcement;
        type Error = DeckFull;

        fn reduce(
            &self,
            deck: &mut Deck,
            action: Boarding,
            _env: &(),
        ) -> Result<SmallVec<[Announcement; 4]>, DeckFull> {
            match action {
                Boarding::Board(n) => {
                    deck.places = deck.places.checked_sub(n).ok_or(DeckFull)?;
                    Ok(smallvec![Announcement::Boarded(n)])
                }
                Boarding::Disembark(n) => {
                    deck.places += n;
                    Ok(SmallVec::new())
                }
            }
        }
    }

    #[test]
    fn test_accepted_scenario_checks_effects_and_state() {
        let deck = ReducerTest::new(DeckReducer, ())
            .given(Deck { places: 2 })
            .when(Boarding::Board(2))
            .expect_effects([Announcement::Boarded(2)])
            .expect_state(|deck| assert_eq!(deck.places, 0))
            .run();
        assert_eq!(deck, Deck { places: 0 });
    }

    #[test]
    fn test_refused_scenario_keeps_the_state() {
        let deck = ReducerTest::new(DeckReducer, ())
            .given(Deck { places: 1 })
            .when(Boarding::Board(2))
            .expect_refusal(|error| assert_eq!(error, &DeckFull))
            .run();
        assert_eq!(deck.places, 1);
    }

    #[test]
    fn test_no_effects_is_an_exact_match() {
        ReducerTest::new(DeckReducer, ())
            .given(Deck { places: 0 })
            .when(Boarding::Disembark(1))
            .expect_effects([])
            .run();
    }

    #[test]
    #[should_panic(expected = "expected a refusal")]
    fn test_unexpected_acceptance_fails() {
        ReducerTest::new(DeckReducer, ())
            .given(Deck { places: 3 })
            .when(Boarding::Board(1))
            .expect_refusal(|_| {})
            .run();
    }
}
