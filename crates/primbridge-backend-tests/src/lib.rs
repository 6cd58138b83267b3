pub mod conformance;
pub mod reference;

/// Expands the conformance suite into `#[test]` functions for one engine.
///
/// `$engine_ctor` is called once per test and must produce a `CudnnEngine`.
#[macro_export]
macro_rules! define_conformance_tests {
    ($module:ident, $engine_ctor:expr) => {
        mod $module {
            #[allow(unused_imports)]
            use super::*;
            use $crate::conformance;

            macro_rules! conformance_test {
                ($name:ident) => {
                    #[test]
                    fn $name() {
                        let engine = ($engine_ctor)();
                        conformance::$name(&engine);
                    }
                };
            }

            conformance_test!(binary_matches_reference_for_every_rank);
            conformance_test!(binary_broadcasts_scalar_operand);
            conformance_test!(binary_supports_half_and_integer_types);
            conformance_test!(binary_applies_int8_source_scales);
            conformance_test!(binary_ignores_scales_on_float_sources);
            conformance_test!(binary_runs_in_place);
            conformance_test!(binary_respects_padded_layout);
            conformance_test!(binary_rejects_rank_above_vendor_limit);
            conformance_test!(binary_rejects_unmapped_algorithms);
            conformance_test!(binary_rejects_unmapped_types);
            conformance_test!(zero_extent_binary_is_noop);
            conformance_test!(binary_reports_missing_argument);
            conformance_test!(binary_rejects_undersized_buffer);
            conformance_test!(lrn_inference_matches_reference);
            conformance_test!(lrn_training_fills_workspace_with_dst);
            conformance_test!(lrn_backward_matches_reference);
            conformance_test!(lrn_rejects_unsupported_configurations);
            conformance_test!(zero_extent_lrn_is_noop);
            conformance_test!(repeated_execution_reuses_descriptors);
            conformance_test!(concurrent_streams_share_a_primitive);
            conformance_test!(concurrent_streams_share_input_buffers);
            conformance_test!(stream_handles_are_created_once_per_stream);
            conformance_test!(interop_waits_for_pending_upload);
            conformance_test!(interop_rejects_undeclared_buffers);
        }
    };
}
