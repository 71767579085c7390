//! Conversion between instances and candidate trees.

use crate::schema::CandidateTree;

use super::{FieldLayout, Instance, KnobMapper, RepresentationError, Setting};

/// Read the setting of every knob from `tree`.
///
/// `tree` is either the exemplar or a tree produced by [`decode`]; loci a
/// knob cannot find read as the identity setting.
pub fn encode(
    tree: &CandidateTree,
    mapper: &KnobMapper,
    layout: &FieldLayout,
) -> Result<Instance, RepresentationError> {
    if layout.len() != mapper.len() {
        return Err(RepresentationError::SizeMismatch {
            expected: layout.len(),
            actual: mapper.len(),
        });
    }

    let disc = mapper
        .disc_knobs()
        .map(|knob| Setting::Disc(knob.setting_of(tree)));
    let contin = mapper
        .contin_knobs()
        .map(|knob| Setting::Contin(knob.setting_of(tree)));
    let instance = Instance(disc.chain(contin).collect());

    layout.check(&instance)?;
    Ok(instance)
}

/// Turn every knob of `mapper` to the setting given by `instance`.
///
/// The returned tree keeps knob placeholders so that it can be encoded
/// again; call [`CandidateTree::clean`] before scoring or reduction. Nothing
/// is returned if any setting is invalid.
pub fn decode(instance: &Instance, mapper: &KnobMapper) -> Result<CandidateTree, RepresentationError> {
    if instance.len() != mapper.len() {
        return Err(RepresentationError::SizeMismatch {
            expected: mapper.len(),
            actual: instance.len(),
        });
    }

    let (disc, contin) = instance.settings().split_at(mapper.disc_count());
    let mut tree = mapper.representation().clone();

    for (index, (knob, setting)) in mapper.disc_knobs().zip(disc).enumerate() {
        let Setting::Disc(value) = *setting else {
            return Err(RepresentationError::TypeMismatch { index });
        };
        let arity = knob.spec().arity;
        if value >= arity {
            return Err(RepresentationError::SettingOutOfRange {
                index,
                setting: value,
                arity,
            });
        }
        knob.turn(&mut tree, value)?;
    }

    let offset = disc.len();
    for (i, (knob, setting)) in mapper.contin_knobs().zip(contin).enumerate() {
        let Setting::Contin(value) = *setting else {
            return Err(RepresentationError::TypeMismatch { index: offset + i });
        };
        knob.turn(&mut tree, value)?;
    }

    Ok(tree)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::representation::{FieldSpec, build_knobs, to_field_layout};
    use crate::compute::scoring::IdentityReducer;
    use crate::schema::{Node, Signature};
    use proptest::prelude::*;

    fn boolean_exemplar() -> CandidateTree {
        CandidateTree::or(vec![
            CandidateTree::and(vec![CandidateTree::arg(0), CandidateTree::not_arg(2)]),
            CandidateTree::arg(1),
            CandidateTree::not(CandidateTree::arg(3)),
        ])
    }

    fn numeric_exemplar() -> CandidateTree {
        CandidateTree::plus(vec![
            CandidateTree::times(vec![CandidateTree::arg(0), CandidateTree::contin(0.5)]),
            CandidateTree::new(Node::Sin, vec![CandidateTree::arg(1)]),
            CandidateTree::contin(-2.0),
        ])
    }

    /// Strategy producing instances inside the layout's bounds.
    fn instances(layout: FieldLayout) -> impl Strategy<Value = Instance> {
        let dims: Vec<BoxedStrategy<Setting>> = layout
            .specs()
            .iter()
            .map(|spec| match spec {
                FieldSpec::Disc(d) => (0..d.arity).prop_map(Setting::Disc).boxed(),
                FieldSpec::Contin(c) => {
                    let mean = c.mean;
                    (-50i32..50)
                        .prop_map(move |k| Setting::Contin(mean + k as f64 * 0.25))
                        .boxed()
                }
            })
            .collect();
        dims.prop_map(Instance)
    }

    #[test]
    fn test_exemplar_encodes_to_identity() {
        for (exemplar, signature) in [
            (boolean_exemplar(), Signature::boolean(4)),
            (numeric_exemplar(), Signature::numeric(2)),
        ] {
            let mapper = build_knobs(&exemplar, 0, signature, &IdentityReducer).unwrap();
            let layout = to_field_layout(&mapper);
            assert_eq!(encode(&exemplar, &mapper, &layout).unwrap(), layout.identity());
            assert_eq!(decode(&layout.identity(), &mapper).unwrap().clean(), exemplar);
        }
    }

    #[test]
    fn test_decode_rejects_bad_instances() {
        let mapper =
            build_knobs(&boolean_exemplar(), 0, Signature::boolean(4), &IdentityReducer).unwrap();
        let layout = to_field_layout(&mapper);

        let mut short = layout.identity();
        short.0.pop();
        assert_eq!(
            decode(&short, &mapper),
            Err(RepresentationError::SizeMismatch {
                expected: layout.len(),
                actual: layout.len() - 1
            })
        );

        let mut long = layout.identity();
        long.0.push(Setting::Disc(0));
        assert!(matches!(
            decode(&long, &mapper),
            Err(RepresentationError::SizeMismatch { .. })
        ));

        let mut wrong = layout.identity();
        wrong.0[0] = Setting::Contin(1.0);
        assert_eq!(
            decode(&wrong, &mapper),
            Err(RepresentationError::TypeMismatch { index: 0 })
        );

        let mut out_of_range = layout.identity();
        out_of_range.0[0] = Setting::Disc(7);
        assert!(matches!(
            decode(&out_of_range, &mapper),
            Err(RepresentationError::SettingOutOfRange { index: 0, setting: 7, .. })
        ));
    }

    #[test]
    fn test_two_loci_commute() {
        let mapper =
            build_knobs(&boolean_exemplar(), 0, Signature::boolean(4), &IdentityReducer).unwrap();
        let layout = to_field_layout(&mapper);

        let mut instance = layout.identity();
        instance.0[0] = Setting::Disc(1);
        let last = instance.len() - 1;
        instance.0[last] = Setting::Disc(2);

        let forward = decode(&instance, &mapper).unwrap();

        let knobs: Vec<_> = mapper.disc_knobs().collect();
        let mut reverse = mapper.representation().clone();
        for (knob, setting) in knobs.iter().zip(instance.settings()).rev() {
            if let Setting::Disc(value) = setting {
                knob.turn(&mut reverse, *value).unwrap();
            }
        }
        assert_eq!(forward, reverse);
        assert_ne!(forward.clean(), boolean_exemplar());
    }

    proptest! {
        #[test]
        fn prop_boolean_round_trip(
            instance in instances(to_field_layout(
                &build_knobs(&boolean_exemplar(), 0, Signature::boolean(4), &IdentityReducer).unwrap()
            ))
        ) {
            let mapper =
                build_knobs(&boolean_exemplar(), 0, Signature::boolean(4), &IdentityReducer).unwrap();
            let layout = to_field_layout(&mapper);
            let tree = decode(&instance, &mapper).unwrap();
            prop_assert_eq!(encode(&tree, &mapper, &layout).unwrap(), instance);
        }

        #[test]
        fn prop_numeric_round_trip(
            instance in instances(to_field_layout(
                &build_knobs(&numeric_exemplar(), 0, Signature::numeric(2), &IdentityReducer).unwrap()
            ))
        ) {
            let mapper =
                build_knobs(&numeric_exemplar(), 0, Signature::numeric(2), &IdentityReducer).unwrap();
            let layout = to_field_layout(&mapper);
            let tree = decode(&instance, &mapper).unwrap();
            prop_assert_eq!(encode(&tree, &mapper, &layout).unwrap(), instance);
        }

        #[test]
        fn prop_knob_order_is_irrelevant(
            instance in instances(to_field_layout(
                &build_knobs(&numeric_exemplar(), 0, Signature::numeric(2), &IdentityReducer).unwrap()
            ))
        ) {
            let mapper =
                build_knobs(&numeric_exemplar(), 0, Signature::numeric(2), &IdentityReducer).unwrap();
            let (disc, contin) = instance.settings().split_at(mapper.disc_count());

            let disc_knobs: Vec<_> = mapper.disc_knobs().collect();
            let contin_knobs: Vec<_> = mapper.contin_knobs().collect();

            let mut reverse = mapper.representation().clone();
            for (knob, setting) in contin_knobs.iter().zip(contin).rev() {
                if let Setting::Contin(value) = setting {
                    knob.turn(&mut reverse, *value).unwrap();
                }
            }
            for (knob, setting) in disc_knobs.iter().zip(disc).rev() {
                if let Setting::Disc(value) = setting {
                    knob.turn(&mut reverse, *value).unwrap();
                }
            }
            prop_assert_eq!(decode(&instance, &mapper).unwrap(), reverse);
        }
    }
}
