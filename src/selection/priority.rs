use crate::peer::PeerLink;
use crate::piece::Piece;

/// Ordering policy for not-yet-complete pieces, selected per download phase.
///
/// `order` is pure and side-effect-free, so the coordinator can call it
/// speculatively without corrupting state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PiecePriority {
    /// Identity order, for phases where ordering carries no meaning.
    Unordered,
    /// Largest piece first; used for single-piece phases such as
    /// metadata-size discovery.
    LargestFirst,
    /// Started pieces first, then rarest-first among not-started pieces.
    /// This is the normal data-download policy.
    #[default]
    Availability,
}

impl PiecePriority {
    /// Orders candidate pieces for the request step. `links` are the
    /// relevant peers this tick; `pieces` the not-yet-complete candidates.
    pub fn order(&self, links: &[&PeerLink], pieces: &[&Piece]) -> Vec<u32> {
        match self {
            PiecePriority::Unordered => pieces.iter().map(|p| p.index()).collect(),

            PiecePriority::LargestFirst => {
                let mut out: Vec<&Piece> = pieces.to_vec();
                out.sort_by(|a, b| {
                    b.length().cmp(&a.length()).then(a.index().cmp(&b.index()))
                });
                out.into_iter().map(|p| p.index()).collect()
            }

            PiecePriority::Availability => {
                let mut started: Vec<u32> = Vec::new();
                let mut fresh: Vec<(usize, u32)> = Vec::new();

                for piece in pieces {
                    if piece.is_started() {
                        started.push(piece.index());
                    } else {
                        fresh.push((availability(links, piece.index()), piece.index()));
                    }
                }

                started.sort_unstable();
                fresh.sort_unstable();

                started
                    .into_iter()
                    .chain(fresh.into_iter().map(|(_, index)| index))
                    .collect()
            }
        }
    }
}

/// How many of the given peers advertise a piece.
fn availability(links: &[&PeerLink], piece_index: u32) -> usize {
    links
        .iter()
        .filter(|link| link.have().has_piece(piece_index as usize))
        .count()
}
