//! Energy redistribution into instrument channels.

use log::{debug, info};
use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;
use xrsim_core::arf::edge_tolerance;
use xrsim_core::events::ENERGY;
use xrsim_core::{Error, EventList, RedistributionMatrix, Result};

/// Assigns a channel to every event by sampling the redistribution matrix.
///
/// Events are sorted by energy and matched to the matrix bins in a single
/// merge-style pass, each bin `[low, high)` consuming the next run of sorted
/// photons. Every field is reordered by the energy sort and the channel is
/// added as an integer field named after the matrix channel type.
///
/// # Errors
/// - [`Error::EnergyOutOfRange`] if a photon energy falls outside every bin.
/// - [`Error::ZeroWeightBin`] if a bin with zero total weight, or no
///   channels, receives photons.
/// - [`Error::MissingField`] if the event list has no energy field.
pub fn scatter_energies<R: Rng + ?Sized>(
    events: &mut EventList,
    rmf: &RedistributionMatrix,
    rng: &mut R,
) -> Result<()> {
    info!(
        "Scattering energies with RMF {}.",
        rmf.filename().file_name().unwrap_or_default().to_string_lossy()
    );

    let energy = events.float(ENERGY)?;
    let n = energy.len();
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| energy[a].total_cmp(&energy[b]));
    let sorted: Vec<f64> = order.iter().map(|&i| energy[i]).collect();

    let mut channels = Vec::with_capacity(n);
    let mut cursor = 0;
    for (k, ((&low, &high), row)) in rmf
        .elo()
        .iter()
        .zip(rmf.ehi())
        .zip(rmf.rows())
        .enumerate()
    {
        if cursor == n {
            break;
        }
        if sorted[cursor] < low - edge_tolerance(low) {
            return Err(Error::EnergyOutOfRange(sorted[cursor]));
        }
        let nn = sorted[cursor..].partition_point(|&e| e < high);
        if nn == 0 {
            continue;
        }

        let true_channels = row.channels();
        let usable = row.weights.len().min(true_channels.len());
        let weights = &row.weights[..usable];
        let total: f64 = weights.iter().sum();
        if total.is_nan() || total <= 0.0 {
            return Err(Error::ZeroWeightBin { bin: k, count: nn });
        }
        let dist = WeightedIndex::new(weights)
            .map_err(|_| Error::ZeroWeightBin { bin: k, count: nn })?;
        channels.extend((0..nn).map(|_| true_channels[dist.sample(rng)]));
        cursor += nn;
    }
    if cursor < n {
        return Err(Error::EnergyOutOfRange(sorted[cursor]));
    }
    debug!("Assigned channels to {n} events");

    events.take(&order);
    events.insert_int(rmf.chan_type(), channels)
}
