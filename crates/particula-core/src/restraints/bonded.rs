use crate::core::attributes::StringAttr;
use crate::core::error::ModelError;
use crate::core::forcefield::params::ForceFieldParameters;
use crate::core::functions::Harmonic;
use crate::core::keys::StringKey;
use crate::core::models::ids::{ParticleId, RestraintId};
use crate::core::models::tuple::ParticleTuple;
use crate::engine::model::Model;
use crate::engine::restraint::TupleRestraint;
use crate::engine::score::DistancePairScore;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Outcome of building bond restraints from force-field parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BondRestraints {
    pub restraints: Vec<RestraintId>,
    /// Bonds whose atom types had no parameters; they were created without a restraint.
    pub skipped: Vec<(ParticleId, ParticleId)>,
}

/// Attaches one harmonic distance restraint per bond.
///
/// The energy `K (d - d0)^2` of a force-field bond is expressed as `Harmonic { mean: d0, k: 2K }`.
///
/// # Arguments
///
/// * `model` - The model to attach the restraints to.
/// * `bonds` - Bonded particle pairs.
/// * `type_key` - String attribute holding each particle's force-field atom type.
/// * `parameters` - The parameter provider.
///
/// # Return
///
/// The attached restraints and the bonds skipped for lack of parameters.
///
/// # Errors
///
/// Lookup failures are logged and skipped; any other error (for example a missing type
/// attribute) is returned.
#[instrument(skip_all, name = "create_bond_restraints", fields(bonds = bonds.len()))]
pub fn create_bond_restraints(
    model: &mut Model,
    bonds: &[(ParticleId, ParticleId)],
    type_key: StringKey,
    parameters: &dyn ForceFieldParameters,
) -> Result<BondRestraints, ModelError> {
    let mut created = BondRestraints::default();
    for &(a, b) in bonds {
        let type_a = model.get_attribute::<StringAttr>(a, type_key)?.clone();
        let type_b = model.get_attribute::<StringAttr>(b, type_key)?.clone();
        match parameters.bond_parameters(&type_a, &type_b) {
            Ok(bond) => {
                let score = Arc::new(DistancePairScore::new(Harmonic::new(
                    bond.ideal,
                    2.0 * bond.force_constant,
                )));
                let name = format!("bond {type_a}-{type_b}");
                let restraint = TupleRestraint::new(&name, score, ParticleTuple::pair(a, b));
                created.restraints.push(model.add_restraint(Box::new(restraint))?);
            }
            Err(err) => {
                warn!(
                    a = model.store().particle_name(a).as_str(),
                    b = model.store().particle_name(b).as_str(),
                    "Skipping bond: {}",
                    err
                );
                created.skipped.push((a, b));
            }
        }
    }
    info!(
        created = created.restraints.len(),
        skipped = created.skipped.len(),
        "Bond restraints created."
    );
    Ok(created)
}
