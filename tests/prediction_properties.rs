use approx::assert_abs_diff_eq;
use m3f::offsets::{OffsetTerm, TopicAxis, accumulate_offsets};
use m3f::{
    Contributions, Dyads, PosteriorSample, PredictError, TopicAssignments, TopicBlock, predict,
};
use ndarray::{Array1, Array2, array};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

const NUM_ROWS: usize = 7;
const NUM_COLS: usize = 5;

fn gaussian_matrix(rng: &mut StdRng, shape: (usize, usize)) -> Array2<f64> {
    Array2::from_shape_simple_fn(shape, || rng.sample::<f64, _>(StandardNormal))
}

/// Normalized topic probabilities, one row per entity, stored as natural logs.
fn log_topic_probabilities(rng: &mut StdRng, entities: usize, topics: usize) -> Array2<f64> {
    let mut weights =
        Array2::from_shape_simple_fn((entities, topics), || rng.gen_range(0.05_f64..1.0));
    for mut row in weights.rows_mut() {
        let total = row.sum();
        row.mapv_inplace(|w| (w / total).ln());
    }
    weights
}

fn random_sample(
    rng: &mut StdRng,
    factors: usize,
    row_topics: usize,
    col_topics: usize,
) -> PosteriorSample {
    let row_block = (row_topics > 0).then(|| TopicBlock {
        log_theta: log_topic_probabilities(rng, NUM_ROWS, row_topics),
        offsets: gaussian_matrix(rng, (NUM_COLS, row_topics)),
    });
    let col_block = (col_topics > 0).then(|| TopicBlock {
        log_theta: log_topic_probabilities(rng, NUM_COLS, col_topics),
        offsets: gaussian_matrix(rng, (NUM_ROWS, col_topics)),
    });
    PosteriorSample {
        chi: rng.sample(StandardNormal),
        a: gaussian_matrix(rng, (NUM_ROWS, factors)),
        b: gaussian_matrix(rng, (NUM_COLS, factors)),
        row_topics: row_block,
        col_topics: col_block,
    }
}

fn random_dyads(rng: &mut StdRng, n: usize) -> Dyads {
    let rows = (0..n).map(|_| rng.gen_range(1..=NUM_ROWS as u32)).collect();
    let cols = (0..n).map(|_| rng.gen_range(1..=NUM_COLS as u32)).collect();
    Dyads::new(rows, cols).unwrap()
}

fn random_topics(rng: &mut StdRng, n: usize, row_topics: u32, col_topics: u32) -> TopicAssignments {
    TopicAssignments {
        row: Some((0..n).map(|_| rng.gen_range(1..=row_topics)).collect()),
        col: Some((0..n).map(|_| rng.gen_range(1..=col_topics)).collect()),
    }
}

fn assert_close(actual: &Array1<f64>, expected: &Array1<f64>) {
    assert_eq!(actual.len(), expected.len());
    for (a, e) in actual.iter().zip(expected.iter()) {
        assert_abs_diff_eq!(*a, *e, epsilon = 1e-10);
    }
}

#[test]
fn averaging_over_samples_is_the_mean_of_single_sample_predictions() {
    let mut rng = StdRng::seed_from_u64(7);
    let dyads = random_dyads(&mut rng, 200);
    let samples: Vec<_> = (0..4).map(|_| random_sample(&mut rng, 3, 2, 4)).collect();

    for topics in [
        TopicAssignments::integrated(),
        random_topics(&mut rng, 200, 2, 4),
    ] {
        let averaged = predict(&dyads, &samples, &topics, Contributions::ALL).unwrap();

        let mut expected = Array1::<f64>::zeros(dyads.len());
        for sample in &samples {
            let single =
                predict(&dyads, std::slice::from_ref(sample), &topics, Contributions::ALL)
                    .unwrap();
            expected += &single;
        }
        expected /= samples.len() as f64;

        assert_close(&averaged, &expected);
    }
}

#[test]
fn contributions_add_up_to_the_full_prediction() {
    let mut rng = StdRng::seed_from_u64(11);
    let dyads = random_dyads(&mut rng, 64);
    let samples: Vec<_> = (0..3).map(|_| random_sample(&mut rng, 2, 3, 2)).collect();
    let topics = TopicAssignments::integrated();

    let full = predict(&dyads, &samples, &topics, Contributions::ALL).unwrap();
    let parts = [
        Contributions {
            factorization: true,
            ..Contributions::NONE
        },
        Contributions {
            row_offsets: true,
            ..Contributions::NONE
        },
        Contributions {
            col_offsets: true,
            ..Contributions::NONE
        },
    ];
    let mut summed = Array1::<f64>::zeros(dyads.len());
    for part in parts {
        summed += &predict(&dyads, &samples, &topics, part).unwrap();
    }

    assert_close(&full, &summed);
}

#[test]
fn all_flags_off_predicts_zero() {
    let mut rng = StdRng::seed_from_u64(3);
    let dyads = random_dyads(&mut rng, 50);
    let samples: Vec<_> = (0..3).map(|_| random_sample(&mut rng, 2, 2, 2)).collect();

    let preds = predict(
        &dyads,
        &samples,
        &TopicAssignments::integrated(),
        Contributions::NONE,
    )
    .unwrap();
    assert!(preds.iter().all(|&p| p == 0.0));
}

#[test]
fn bias_only_model_predicts_chi_everywhere() {
    let mut rng = StdRng::seed_from_u64(5);
    let dyads = random_dyads(&mut rng, 40);
    let mut sample = random_sample(&mut rng, 0, 3, 3);
    sample.chi = 2.75;

    let preds = predict(
        &dyads,
        &[sample],
        &TopicAssignments::integrated(),
        Contributions {
            factorization: true,
            ..Contributions::NONE
        },
    )
    .unwrap();
    assert!(preds.iter().all(|&p| p == 2.75));
}

#[test]
fn single_topic_paths_agree_bit_for_bit() {
    let mut rng = StdRng::seed_from_u64(13);
    let n = 300;
    let dyads = random_dyads(&mut rng, n);
    let samples: Vec<_> = (0..3).map(|_| random_sample(&mut rng, 2, 1, 1)).collect();
    let only_row = Contributions {
        row_offsets: true,
        ..Contributions::NONE
    };
    let only_col = Contributions {
        col_offsets: true,
        ..Contributions::NONE
    };
    let fixed = TopicAssignments {
        row: Some(vec![1; n]),
        col: Some(vec![1; n]),
    };
    let integrated = TopicAssignments::integrated();

    for flags in [only_row, only_col] {
        let known = predict(&dyads, &samples, &fixed, flags).unwrap();
        let marginal = predict(&dyads, &samples, &integrated, flags).unwrap();
        assert_eq!(known, marginal);
    }
}

#[test]
fn column_offsets_are_row_offsets_with_axes_swapped() {
    let mut rng = StdRng::seed_from_u64(17);
    let dyads = random_dyads(&mut rng, 120);
    let sample = random_sample(&mut rng, 2, 0, 3);
    let topics = TopicAssignments::integrated();

    let col_contribution = predict(
        &dyads,
        std::slice::from_ref(&sample),
        &topics,
        Contributions {
            col_offsets: true,
            ..Contributions::NONE
        },
    )
    .unwrap();

    // Transpose the model: columns become rows and the column-topic block
    // becomes the row-topic block.
    let transposed = PosteriorSample {
        chi: sample.chi,
        a: sample.b.clone(),
        b: sample.a.clone(),
        row_topics: sample.col_topics.clone(),
        col_topics: None,
    };
    let swapped = Dyads::new(dyads.cols().to_vec(), dyads.rows().to_vec()).unwrap();
    let row_contribution = predict(
        &swapped,
        &[transposed],
        &topics,
        Contributions {
            row_offsets: true,
            ..Contributions::NONE
        },
    )
    .unwrap();

    assert_eq!(col_contribution, row_contribution);
}

/// Direct evaluation of one integrated offset term: `sum_k offsets[sec, k] * theta[prim, k]`.
fn expected_offset(block: &TopicBlock, primary: u32, secondary: u32) -> f64 {
    let theta = block.log_theta.row(primary as usize - 1);
    let offsets = block.offsets.row(secondary as usize - 1);
    (0..theta.len()).map(|k| offsets[k] * theta[k].exp()).sum()
}

#[test]
fn integrated_offsets_match_direct_topic_sums() {
    let mut rng = StdRng::seed_from_u64(29);
    let dyads = random_dyads(&mut rng, 250);
    let sample = random_sample(&mut rng, 2, 3, 4);
    let topics = TopicAssignments::integrated();
    let row_block = sample.row_topics.as_ref().unwrap();
    let col_block = sample.col_topics.as_ref().unwrap();

    let row_part = predict(
        &dyads,
        std::slice::from_ref(&sample),
        &topics,
        Contributions {
            row_offsets: true,
            ..Contributions::NONE
        },
    )
    .unwrap();
    let col_part = predict(
        &dyads,
        std::slice::from_ref(&sample),
        &topics,
        Contributions {
            col_offsets: true,
            ..Contributions::NONE
        },
    )
    .unwrap();

    for (e, (&row, &col)) in dyads.rows().iter().zip(dyads.cols()).enumerate() {
        // Row topics weight the column's offsets; column topics weight the row's.
        assert_abs_diff_eq!(row_part[e], expected_offset(row_block, row, col), epsilon = 1e-12);
        assert_abs_diff_eq!(col_part[e], expected_offset(col_block, col, row), epsilon = 1e-12);
    }
}

#[test]
fn factorization_matches_direct_inner_products() {
    let mut rng = StdRng::seed_from_u64(31);
    let dyads = random_dyads(&mut rng, 250);
    let sample = random_sample(&mut rng, 3, 2, 2);

    let preds = predict(
        &dyads,
        std::slice::from_ref(&sample),
        &TopicAssignments::integrated(),
        Contributions {
            factorization: true,
            ..Contributions::NONE
        },
    )
    .unwrap();

    for (e, (&row, &col)) in dyads.rows().iter().zip(dyads.cols()).enumerate() {
        let (r, c) = (row as usize - 1, col as usize - 1);
        let inner: f64 = (0..3).map(|f| sample.a[[r, f]] * sample.b[[c, f]]).sum();
        assert_abs_diff_eq!(preds[e], sample.chi + inner, epsilon = 1e-12);
    }
}

#[test]
fn identical_samples_average_to_a_single_sample() {
    let mut rng = StdRng::seed_from_u64(19);
    let dyads = random_dyads(&mut rng, 80);
    let sample = random_sample(&mut rng, 4, 2, 3);
    let topics = random_topics(&mut rng, 80, 2, 3);

    let once = predict(&dyads, std::slice::from_ref(&sample), &topics, Contributions::ALL).unwrap();
    let copies = vec![sample; 5];
    let repeated = predict(&dyads, &copies, &topics, Contributions::ALL).unwrap();

    assert_close(&repeated, &once);
}

#[test]
fn worked_factorization_example() {
    let dyads = Dyads::new(vec![1, 2], vec![1, 1]).unwrap();
    let sample = PosteriorSample {
        chi: 1.0,
        a: array![[2.0], [3.0]],
        b: array![[5.0]],
        row_topics: None,
        col_topics: None,
    };
    let preds = predict(
        &dyads,
        &[sample],
        &TopicAssignments::integrated(),
        Contributions {
            factorization: true,
            ..Contributions::NONE
        },
    )
    .unwrap();
    assert_eq!(preds, array![11.0, 16.0]);
}

#[test]
fn worked_integrated_offset_example() {
    let block = TopicBlock {
        log_theta: array![[0.25_f64.ln(), 0.75_f64.ln()]],
        offsets: array![[2.0, 10.0]],
    };
    let dyads = Dyads::new(vec![1], vec![1]).unwrap();
    let sample = PosteriorSample {
        chi: 0.0,
        a: Array2::zeros((1, 0)),
        b: Array2::zeros((1, 0)),
        row_topics: Some(block),
        col_topics: None,
    };
    let topics = TopicAssignments::integrated();

    let term = OffsetTerm::for_axis(TopicAxis::Row, &dyads, &sample, &topics).unwrap();
    let mut preds = vec![0.0];
    accumulate_offsets(&term, &mut preds);
    assert_abs_diff_eq!(preds[0], 8.0, epsilon = 1e-12);
}

#[test]
fn known_topics_are_shared_across_samples() {
    let dyads = Dyads::new(vec![1, 1], vec![1, 2]).unwrap();
    let make = |first: f64| PosteriorSample {
        chi: 0.0,
        a: Array2::zeros((1, 0)),
        b: Array2::zeros((2, 0)),
        row_topics: Some(TopicBlock {
            log_theta: array![[0.5_f64.ln(), 0.5_f64.ln()]],
            offsets: array![[first, 100.0], [first + 1.0, 200.0]],
        }),
        col_topics: None,
    };
    let topics = TopicAssignments {
        row: Some(vec![2, 1]),
        col: None,
    };
    let preds = predict(
        &dyads,
        &[make(1.0), make(3.0)],
        &topics,
        Contributions {
            row_offsets: true,
            ..Contributions::NONE
        },
    )
    .unwrap();
    // Example 1 reads topic 2 of column 1 in both samples; example 2 reads
    // topic 1 of column 2, which differs per sample.
    assert_eq!(preds, array![100.0, 3.0]);
}

#[test]
fn mismatched_shapes_are_reported_before_any_work() {
    let mut rng = StdRng::seed_from_u64(23);
    let dyads = random_dyads(&mut rng, 10);
    let samples = vec![random_sample(&mut rng, 2, 2, 2), random_sample(&mut rng, 3, 2, 2)];

    let err = predict(
        &dyads,
        &samples,
        &TopicAssignments::integrated(),
        Contributions::ALL,
    )
    .unwrap_err();
    assert!(matches!(
        err,
        PredictError::InconsistentDimensions { sample: 1, .. }
    ));

    let short_draw = TopicAssignments {
        row: None,
        col: Some(vec![1; 9]),
    };
    let err = predict(&dyads, &samples[..1], &short_draw, Contributions::ALL).unwrap_err();
    assert!(matches!(
        err,
        PredictError::LengthMismatch {
            what: "column topic",
            expected: 10,
            found: 9
        }
    ));

    assert_eq!(
        predict(&dyads, &[], &TopicAssignments::integrated(), Contributions::ALL),
        Err(PredictError::NoSamples)
    );
}
