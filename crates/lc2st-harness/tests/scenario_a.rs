//! Equal populations: held-out accuracy of the vanilla test centres on 0.5.

use lc2st_classifier::ClassifierConfig;
use lc2st_harness::null_accuracy_study;

#[test]
fn null_accuracy_is_chance_level() {
    let accuracies =
        null_accuracy_study(5, 100, 2, 300, &ClassifierConfig::default(), 20_260_101).unwrap();
    assert_eq!(accuracies.len(), 300);
    let mean = accuracies.iter().sum::<f64>() / accuracies.len() as f64;
    assert!((0.45..=0.55).contains(&mean), "mean null accuracy {mean}");
    assert!(accuracies.iter().all(|a| (0.0..=1.0).contains(a)));
}
