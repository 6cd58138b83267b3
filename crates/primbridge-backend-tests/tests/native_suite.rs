use primbridge_backend_tests::conformance;
use primbridge_cudnn::{CudnnEngine, EngineConfig};

fn engine_or_skip() -> Option<CudnnEngine> {
    primbridge::logging::init_logging();
    if !CudnnEngine::is_native_available() {
        eprintln!("skipping native cuDNN test: CUDA driver or cuDNN unavailable");
        return None;
    }
    match CudnnEngine::native(&EngineConfig::from_env()) {
        Ok(engine) => Some(engine),
        Err(err) => {
            eprintln!("skipping native cuDNN test: {err}");
            None
        }
    }
}

macro_rules! native_test {
    ($name:ident) => {
        #[test]
        fn $name() {
            let Some(engine) = engine_or_skip() else {
                return;
            };
            conformance::$name(&engine);
        }
    };
}

native_test!(binary_matches_reference_for_every_rank);
native_test!(binary_broadcasts_scalar_operand);
native_test!(binary_supports_half_and_integer_types);
native_test!(binary_applies_int8_source_scales);
native_test!(binary_runs_in_place);
native_test!(binary_respects_padded_layout);
native_test!(binary_rejects_rank_above_vendor_limit);
native_test!(zero_extent_binary_is_noop);
native_test!(lrn_inference_matches_reference);
native_test!(lrn_training_fills_workspace_with_dst);
native_test!(lrn_backward_matches_reference);
native_test!(concurrent_streams_share_a_primitive);
native_test!(concurrent_streams_share_input_buffers);
native_test!(stream_handles_are_created_once_per_stream);
native_test!(interop_waits_for_pending_upload);
