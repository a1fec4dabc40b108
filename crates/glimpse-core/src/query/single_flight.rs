// Per-channel single-flight slots for superseding queries

use super::cancel::CancellationToken;
use crate::embedding::QueryChannel;
use parking_lot::Mutex;

/// One admitted query: its channel, its generation and its token.
#[derive(Debug, Clone)]
pub struct Flight {
    pub channel: QueryChannel,
    /// Strictly increasing across both channels
    pub generation: u64,
    pub token: CancellationToken,
}

struct Slot {
    generation: u64,
    token: CancellationToken,
}

struct State {
    next_generation: u64,
    text: Option<Slot>,
    image: Option<Slot>,
}

impl State {
    fn slot(&mut self, channel: QueryChannel) -> &mut Option<Slot> {
        match channel {
            QueryChannel::Text => &mut self.text,
            QueryChannel::Image => &mut self.image,
        }
    }
}

/// At most one live query per channel.
///
/// [`SingleFlight::begin`] cancels whatever occupied the channel before.
/// [`SingleFlight::finish`] runs its publish step only if the flight still
/// owns its slot, under the same lock `begin` takes, so a superseded query
/// can never publish after its successor was admitted.
pub struct SingleFlight {
    state: Mutex<State>,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                // Generation 0 is the initial "show all" board
                next_generation: 1,
                text: None,
                image: None,
            }),
        }
    }

    /// Admits a new query on `channel`, cancelling the previous one.
    pub fn begin(&self, channel: QueryChannel) -> Flight {
        let token = CancellationToken::new();
        let mut state = self.state.lock();
        let generation = state.next_generation;
        state.next_generation += 1;

        let previous = state.slot(channel).replace(Slot {
            generation,
            token: token.clone(),
        });
        if let Some(previous) = previous {
            previous.token.cancel();
        }

        Flight {
            channel,
            generation,
            token,
        }
    }

    /// Runs `publish` if `flight` is still current, releasing its slot.
    ///
    /// Returns `None` when the flight was superseded or cancelled.
    pub fn finish<R>(&self, flight: &Flight, publish: impl FnOnce() -> R) -> Option<R> {
        let mut state = self.state.lock();
        let slot = state.slot(flight.channel);
        let current = matches!(slot, Some(s) if s.generation == flight.generation);
        if !current || flight.token.is_cancelled() {
            return None;
        }
        *slot = None;
        Some(publish())
    }

    /// Whether `flight` still owns its channel.
    pub fn is_current(&self, flight: &Flight) -> bool {
        let mut state = self.state.lock();
        matches!(state.slot(flight.channel), Some(s) if s.generation == flight.generation)
    }

    /// Cancels every live query.
    pub fn cancel_all(&self) {
        let mut state = self.state.lock();
        for channel in [QueryChannel::Text, QueryChannel::Image] {
            if let Some(slot) = state.slot(channel).take() {
                slot.token.cancel();
            }
        }
    }
}

impl Default for SingleFlight {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_newer_flight_cancels_older() {
        let flights = SingleFlight::new();
        let a = flights.begin(QueryChannel::Text);
        let b = flights.begin(QueryChannel::Text);

        assert!(a.token.is_cancelled());
        assert!(!b.token.is_cancelled());
        assert!(b.generation > a.generation);

        assert_eq!(flights.finish(&a, || "a"), None);
        assert_eq!(flights.finish(&b, || "b"), Some("b"));
    }

    #[test]
    fn test_channels_are_independent() {
        let flights = SingleFlight::new();
        let text = flights.begin(QueryChannel::Text);
        let image = flights.begin(QueryChannel::Image);

        assert!(!text.token.is_cancelled());
        assert!(flights.is_current(&text));
        assert!(flights.is_current(&image));
        assert_ne!(text.generation, image.generation);
    }

    #[test]
    fn test_finish_releases_slot() {
        let flights = SingleFlight::new();
        let a = flights.begin(QueryChannel::Image);
        assert_eq!(flights.finish(&a, || 1), Some(1));
        assert!(!flights.is_current(&a));
        assert_eq!(flights.finish(&a, || 2), None);
    }

    #[test]
    fn test_cancel_all() {
        let flights = SingleFlight::new();
        let text = flights.begin(QueryChannel::Text);
        let image = flights.begin(QueryChannel::Image);
        flights.cancel_all();
        assert!(text.token.is_cancelled());
        assert!(image.token.is_cancelled());
        assert_eq!(flights.finish(&text, || ()), None);
    }
}
