use serde::{Deserialize, Serialize};

/// Min-needed values above this are flagged as hard to reach.
const HARD_MIN_CUTOFF: f64 = 85.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoryMode {
    Known,
    Analyze,
    Estimated,
}

impl CategoryMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "known" => Some(Self::Known),
            "analyze" => Some(Self::Analyze),
            "estimated" => Some(Self::Estimated),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Known => "known",
            Self::Analyze => "analyze",
            Self::Estimated => "estimated",
        }
    }

    /// Known and Estimated categories carry a grade; Analyze ones are filled.
    pub fn carries_grade(self) -> bool {
        match self {
            Self::Known | Self::Estimated => true,
            Self::Analyze => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FillStrategy {
    AvgKnownEstimated,
    WorstCase,
}

impl FillStrategy {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "avg_known_estimated" => Some(Self::AvgKnownEstimated),
            "worst_case" => Some(Self::WorstCase),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeSettings {
    pub a_threshold: f64,
    pub a_minus_threshold: f64,
    pub worst_case_fill: f64,
    pub fill_strategy: FillStrategy,
}

impl Default for GradeSettings {
    fn default() -> Self {
        Self {
            a_threshold: 93.0,
            a_minus_threshold: 90.0,
            worst_case_fill: 50.0,
            fill_strategy: FillStrategy::AvgKnownEstimated,
        }
    }
}

/// One category as seen by the projection engine. `grade` is the effective
/// grade, i.e. already derived from assignments when there are any.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CategoryInput {
    pub weight: f64,
    pub mode: CategoryMode,
    pub grade: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AssignmentInput {
    pub earned: Option<f64>,
    pub total: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentTotals {
    pub percent: f64,
    pub earned: f64,
    pub possible: f64,
}

fn finite(v: Option<f64>) -> Option<f64> {
    v.filter(|x| x.is_finite())
}

fn finite_weight(c: &CategoryInput) -> f64 {
    if c.weight.is_finite() {
        c.weight
    } else {
        0.0
    }
}

/// Grade a Known/Estimated category contributes, if any.
fn graded_value(c: &CategoryInput) -> Option<f64> {
    if c.mode.carries_grade() {
        finite(c.grade)
    } else {
        None
    }
}

/// Rounds half away from zero to `places` decimals.
pub fn round_to(x: f64, places: i32) -> f64 {
    let factor = 10_f64.powi(places);
    (x * factor).round() / factor
}

/// Aggregates assignments with a positive total. Extra credit is not clamped.
pub fn derive_category_grade(assignments: &[AssignmentInput]) -> Option<AssignmentTotals> {
    let mut earned = 0.0_f64;
    let mut possible = 0.0_f64;
    let mut counted = 0_usize;

    for a in assignments {
        let Some(total) = finite(a.total) else {
            continue;
        };
        if total <= 0.0 {
            continue;
        }
        counted += 1;
        possible += total;
        earned += finite(a.earned).unwrap_or(0.0);
    }

    if counted == 0 {
        return None;
    }
    let percent = 100.0 * earned / possible;
    if !percent.is_finite() {
        return None;
    }
    Some(AssignmentTotals {
        percent,
        earned,
        possible,
    })
}

/// Derived grade when assignments qualify, otherwise the manual grade.
pub fn effective_grade(manual: Option<f64>, assignments: &[AssignmentInput]) -> Option<f64> {
    derive_category_grade(assignments)
        .map(|t| t.percent)
        .or_else(|| finite(manual))
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Projection {
    pub current_grade: Option<f64>,
    pub final_worst_case: Option<f64>,
    pub final_estimate: Option<f64>,
    pub min_for_a: Option<f64>,
    pub min_for_a_minus: Option<f64>,
    pub has_analyze: bool,
    /// Points already secured on the full 100-point scale (raw weights).
    #[serde(skip)]
    secured_points: f64,
    #[serde(skip)]
    analyze_weight_fraction: f64,
}

impl Projection {
    /// Average needed across Analyze categories to finish at `threshold`.
    /// Uses raw class weights, unlike the renormalized current grade.
    pub fn min_for_threshold(&self, threshold: f64) -> Option<f64> {
        if !threshold.is_finite() || self.analyze_weight_fraction <= 0.0 {
            return None;
        }
        finite(Some(
            (threshold - self.secured_points) / self.analyze_weight_fraction,
        ))
    }
}

fn fill_average(categories: &[CategoryInput], fill: f64) -> Option<f64> {
    let mut sum = 0.0_f64;
    let mut denom = 0.0_f64;
    for c in categories {
        let value = match c.mode {
            CategoryMode::Analyze => Some(fill),
            CategoryMode::Known | CategoryMode::Estimated => graded_value(c),
        };
        let Some(value) = value else {
            continue;
        };
        let w = finite_weight(c);
        sum += w * value;
        denom += w;
    }
    if denom > 0.0 {
        finite(Some(sum / denom))
    } else {
        None
    }
}

pub fn compute_projection(categories: &[CategoryInput], settings: &GradeSettings) -> Projection {
    let mut graded_sum = 0.0_f64;
    let mut graded_weight = 0.0_f64;
    let mut analyze_weight = 0.0_f64;
    let mut has_analyze = false;

    for c in categories {
        let w = finite_weight(c);
        match c.mode {
            CategoryMode::Analyze => {
                has_analyze = true;
                analyze_weight += w;
            }
            CategoryMode::Known | CategoryMode::Estimated => {
                if let Some(g) = graded_value(c) {
                    graded_sum += w * g;
                    graded_weight += w;
                }
            }
        }
    }

    let current_grade = if graded_weight > 0.0 {
        finite(Some(graded_sum / graded_weight))
    } else {
        None
    };

    let worst_fill = if settings.worst_case_fill.is_finite() {
        settings.worst_case_fill
    } else {
        0.0
    };
    let final_worst_case = fill_average(categories, worst_fill);

    let estimate_fill = match settings.fill_strategy {
        FillStrategy::AvgKnownEstimated => current_grade.unwrap_or(worst_fill),
        FillStrategy::WorstCase => worst_fill,
    };
    let final_estimate = fill_average(categories, estimate_fill);

    let mut projection = Projection {
        current_grade,
        final_worst_case,
        final_estimate,
        min_for_a: None,
        min_for_a_minus: None,
        has_analyze,
        secured_points: graded_sum / 100.0,
        analyze_weight_fraction: analyze_weight / 100.0,
    };
    projection.min_for_a = projection.min_for_threshold(settings.a_threshold);
    projection.min_for_a_minus = projection.min_for_threshold(settings.a_minus_threshold);
    projection
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum GradeBand {
    A,
    AMinus,
    Below,
}

pub fn grade_band(value: Option<f64>, settings: &GradeSettings) -> Option<GradeBand> {
    let v = finite(value)?;
    if v >= settings.a_threshold {
        Some(GradeBand::A)
    } else if v >= settings.a_minus_threshold {
        Some(GradeBand::AMinus)
    } else {
        Some(GradeBand::Below)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum MinOutlook {
    NoAnalyze,
    Secured,
    Needed { value: f64, hard: bool },
    Impossible { value: f64 },
}

pub fn min_outlook(min_required: Option<f64>) -> MinOutlook {
    match finite(min_required) {
        None => MinOutlook::NoAnalyze,
        Some(v) if v <= 0.0 => MinOutlook::Secured,
        Some(v) if v > 100.0 => MinOutlook::Impossible { value: v },
        Some(v) => MinOutlook::Needed {
            value: v,
            hard: v > HARD_MIN_CUTOFF,
        },
    }
}

/// Starting what-if value for a category in the sandbox.
pub fn sandbox_seed(
    mode: CategoryMode,
    effective: Option<f64>,
    settings: &GradeSettings,
) -> Option<f64> {
    match mode {
        CategoryMode::Known => None,
        CategoryMode::Analyze => Some(settings.worst_case_fill),
        CategoryMode::Estimated => Some(finite(effective).unwrap_or(0.0)),
    }
}

/// Renormalized Known+Estimated average, or the worst-case fill when nothing
/// is graded yet.
pub fn avg_known_estimated(categories: &[CategoryInput], settings: &GradeSettings) -> f64 {
    compute_projection(categories, settings)
        .current_grade
        .unwrap_or(settings.worst_case_fill)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxOutcome {
    pub total: f64,
    pub delta_a: f64,
    pub delta_a_minus: f64,
    pub band: Option<GradeBand>,
}

/// Whole-class total over raw weights. Known categories use their fixed grade;
/// every other category uses the matching entry of `what_if`. Missing values
/// contribute nothing.
pub fn sandbox_total(
    categories: &[CategoryInput],
    what_if: &[Option<f64>],
    settings: &GradeSettings,
) -> SandboxOutcome {
    let mut total = 0.0_f64;
    for (i, c) in categories.iter().enumerate() {
        let value = match c.mode {
            CategoryMode::Known => finite(c.grade),
            CategoryMode::Analyze | CategoryMode::Estimated => {
                finite(what_if.get(i).copied().flatten())
            }
        };
        if let Some(v) = value {
            total += finite_weight(c) / 100.0 * v;
        }
    }
    if !total.is_finite() {
        total = 0.0;
    }
    SandboxOutcome {
        total,
        delta_a: total - settings.a_threshold,
        delta_a_minus: total - settings.a_minus_threshold,
        band: grade_band(Some(total), settings),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cat(weight: f64, mode: CategoryMode, grade: Option<f64>) -> CategoryInput {
        CategoryInput {
            weight,
            mode,
            grade,
        }
    }

    fn assignment(earned: f64, total: f64) -> AssignmentInput {
        AssignmentInput {
            earned: Some(earned),
            total: Some(total),
        }
    }

    fn close(a: Option<f64>, b: f64) -> bool {
        a.map(|v| (v - b).abs() < 1e-9).unwrap_or(false)
    }

    #[test]
    fn current_grade_renormalizes_over_graded_categories() {
        let cats = vec![
            cat(40.0, CategoryMode::Known, Some(80.0)),
            cat(30.0, CategoryMode::Analyze, None),
            cat(30.0, CategoryMode::Analyze, None),
        ];
        let p = compute_projection(&cats, &GradeSettings::default());
        assert!(close(p.current_grade, 80.0));
    }

    #[test]
    fn end_to_end_homework_midterm_final() {
        let cats = vec![
            cat(30.0, CategoryMode::Known, Some(92.0)),
            cat(30.0, CategoryMode::Known, Some(85.0)),
            cat(40.0, CategoryMode::Analyze, None),
        ];
        let p = compute_projection(&cats, &GradeSettings::default());
        assert!(close(p.current_grade, 88.5));
        assert!(close(p.final_worst_case, 73.1));
        // Analyze filled with the current grade.
        assert!(close(p.final_estimate, 88.5));
        assert!(close(p.min_for_a, 99.75));
        assert!(close(p.min_for_a_minus, (90.0 - 53.1) / 0.4));
        assert!(p.has_analyze);
        assert_eq!(
            min_outlook(p.min_for_a),
            MinOutlook::Needed {
                value: p.min_for_a.unwrap_or_default(),
                hard: true
            }
        );
    }

    #[test]
    fn min_for_threshold_uses_raw_weights() {
        // 70 points secured, 30% of the class left to analyze.
        let cats = vec![
            cat(70.0, CategoryMode::Known, Some(100.0)),
            cat(30.0, CategoryMode::Analyze, None),
        ];
        let p = compute_projection(&cats, &GradeSettings::default());
        let expected = (93.0 - 70.0) / 0.3;
        assert!(close(p.min_for_threshold(93.0), expected));
        assert!((expected - 76.666_666_666).abs() < 1e-6);
    }

    #[test]
    fn threshold_already_secured_is_non_positive() {
        let cats = vec![
            cat(95.0, CategoryMode::Known, Some(100.0)),
            cat(5.0, CategoryMode::Analyze, None),
        ];
        let p = compute_projection(&cats, &GradeSettings::default());
        let v = p.min_for_threshold(93.0).expect("analyze weight present");
        assert!(v <= 0.0);
        assert_eq!(min_outlook(Some(v)), MinOutlook::Secured);
    }

    #[test]
    fn impossible_threshold_is_reported_not_clamped() {
        let cats = vec![
            cat(80.0, CategoryMode::Known, Some(50.0)),
            cat(20.0, CategoryMode::Analyze, None),
        ];
        let p = compute_projection(&cats, &GradeSettings::default());
        let v = p.min_for_a.expect("min for A");
        assert!(close(Some(v), (93.0 - 40.0) / 0.2));
        assert!(matches!(min_outlook(Some(v)), MinOutlook::Impossible { .. }));
    }

    #[test]
    fn no_analyze_categories_gives_null_min() {
        let cats = vec![
            cat(50.0, CategoryMode::Known, Some(90.0)),
            cat(50.0, CategoryMode::Estimated, Some(80.0)),
        ];
        let p = compute_projection(&cats, &GradeSettings::default());
        assert!(!p.has_analyze);
        assert_eq!(p.min_for_a, None);
        assert_eq!(p.min_for_a_minus, None);
        assert_eq!(p.min_for_threshold(0.0), None);
        assert_eq!(min_outlook(p.min_for_a), MinOutlook::NoAnalyze);
        assert!(close(p.current_grade, 85.0));
    }

    #[test]
    fn worst_case_never_exceeds_estimate_when_fill_is_lower() {
        let settings = GradeSettings::default();
        let cats = vec![
            cat(25.0, CategoryMode::Known, Some(78.0)),
            cat(25.0, CategoryMode::Estimated, Some(88.0)),
            cat(20.0, CategoryMode::Analyze, None),
            cat(30.0, CategoryMode::Analyze, None),
        ];
        let p = compute_projection(&cats, &settings);
        let current = p.current_grade.expect("current");
        assert!(settings.worst_case_fill <= current);
        assert!(p.final_worst_case.expect("worst") <= p.final_estimate.expect("estimate"));
    }

    #[test]
    fn worst_case_fill_strategy_matches_worst_case_projection() {
        let settings = GradeSettings {
            fill_strategy: FillStrategy::WorstCase,
            ..GradeSettings::default()
        };
        let cats = vec![
            cat(60.0, CategoryMode::Known, Some(90.0)),
            cat(40.0, CategoryMode::Analyze, None),
        ];
        let p = compute_projection(&cats, &settings);
        assert_eq!(p.final_estimate, p.final_worst_case);
        assert!(close(p.final_worst_case, 0.6 * 90.0 + 0.4 * 50.0));
    }

    #[test]
    fn ungraded_known_is_absent_not_zero() {
        let cats = vec![
            cat(50.0, CategoryMode::Known, Some(90.0)),
            cat(30.0, CategoryMode::Known, None),
            cat(20.0, CategoryMode::Estimated, Some(f64::NAN)),
        ];
        let p = compute_projection(&cats, &GradeSettings::default());
        assert!(close(p.current_grade, 90.0));
        assert!(close(p.final_worst_case, 90.0));
        assert!(close(p.final_estimate, 90.0));
    }

    #[test]
    fn nothing_usable_yields_nulls_without_nan() {
        let cats = vec![cat(100.0, CategoryMode::Known, None)];
        let p = compute_projection(&cats, &GradeSettings::default());
        assert_eq!(p.current_grade, None);
        assert_eq!(p.final_worst_case, None);
        assert_eq!(p.final_estimate, None);
        assert_eq!(p.min_for_a, None);

        let p = compute_projection(&[], &GradeSettings::default());
        assert_eq!(p.current_grade, None);
        assert_eq!(p.final_estimate, None);
    }

    #[test]
    fn estimate_falls_back_to_worst_fill_without_current() {
        let cats = vec![
            cat(50.0, CategoryMode::Known, None),
            cat(50.0, CategoryMode::Analyze, None),
        ];
        let p = compute_projection(&cats, &GradeSettings::default());
        assert_eq!(p.current_grade, None);
        assert!(close(p.final_estimate, 50.0));
        assert!(close(p.final_worst_case, 50.0));
        assert!(close(p.min_for_a, 93.0 / 0.5));
    }

    #[test]
    fn assignment_derivation_sums_before_dividing() {
        let t = derive_category_grade(&[assignment(45.0, 50.0), assignment(18.0, 20.0)])
            .expect("derived");
        assert!((t.percent - 90.0).abs() < 1e-9);
        assert_eq!(t.earned, 63.0);
        assert_eq!(t.possible, 70.0);
    }

    #[test]
    fn assignment_extra_credit_is_not_clamped() {
        let t = derive_category_grade(&[assignment(55.0, 50.0)]).expect("derived");
        assert!((t.percent - 110.0).abs() < 1e-9);
    }

    #[test]
    fn assignment_zero_total_does_not_count() {
        assert_eq!(derive_category_grade(&[assignment(0.0, 0.0)]), None);
        assert_eq!(derive_category_grade(&[assignment(5.0, -10.0)]), None);
        assert_eq!(derive_category_grade(&[]), None);

        let blank_earned = AssignmentInput {
            earned: None,
            total: Some(10.0),
        };
        let t = derive_category_grade(&[blank_earned, assignment(10.0, 10.0)]).expect("derived");
        assert!((t.percent - 50.0).abs() < 1e-9);
    }

    #[test]
    fn effective_grade_prefers_assignments() {
        assert_eq!(
            effective_grade(Some(70.0), &[assignment(9.0, 10.0)]),
            Some(90.0)
        );
        assert_eq!(effective_grade(Some(70.0), &[assignment(9.0, 0.0)]), Some(70.0));
        assert_eq!(effective_grade(Some(f64::NAN), &[]), None);
    }

    #[test]
    fn grade_band_uses_settings_thresholds() {
        let s = GradeSettings::default();
        assert_eq!(grade_band(Some(93.0), &s), Some(GradeBand::A));
        assert_eq!(grade_band(Some(92.99), &s), Some(GradeBand::AMinus));
        assert_eq!(grade_band(Some(89.9), &s), Some(GradeBand::Below));
        assert_eq!(grade_band(None, &s), None);
    }

    #[test]
    fn sandbox_total_uses_raw_weights_and_fixed_known() {
        let s = GradeSettings::default();
        let cats = vec![
            cat(30.0, CategoryMode::Known, Some(92.0)),
            cat(30.0, CategoryMode::Estimated, Some(85.0)),
            cat(40.0, CategoryMode::Analyze, None),
        ];
        let seeds: Vec<Option<f64>> = cats
            .iter()
            .map(|c| sandbox_seed(c.mode, c.grade, &s))
            .collect();
        assert_eq!(seeds, vec![None, Some(85.0), Some(50.0)]);

        let out = sandbox_total(&cats, &seeds, &s);
        assert!((out.total - 73.1).abs() < 1e-9);
        assert!((out.delta_a - (73.1 - 93.0)).abs() < 1e-9);
        assert_eq!(out.band, Some(GradeBand::Below));

        let out = sandbox_total(&cats, &[Some(0.0), Some(100.0), Some(100.0)], &s);
        assert!((out.total - (27.6 + 30.0 + 40.0)).abs() < 1e-9);
        assert_eq!(out.band, Some(GradeBand::A));
    }

    #[test]
    fn avg_known_estimated_falls_back_to_worst_fill() {
        let s = GradeSettings::default();
        let cats = vec![cat(100.0, CategoryMode::Analyze, None)];
        assert_eq!(avg_known_estimated(&cats, &s), 50.0);
    }

    #[test]
    fn round_to_four_places() {
        assert_eq!(round_to(2.0 / 3.0 * 100.0, 4), 66.6667);
        assert_eq!(round_to(88.5, 1), 88.5);
    }

    #[test]
    fn mode_and_strategy_parse_wire_names() {
        assert_eq!(CategoryMode::parse("analyze"), Some(CategoryMode::Analyze));
        assert_eq!(CategoryMode::parse("Known"), None);
        assert_eq!(CategoryMode::Estimated.as_str(), "estimated");
        assert_eq!(FillStrategy::parse("worst_case"), Some(FillStrategy::WorstCase));
        assert_eq!(FillStrategy::parse("avg"), None);
    }
}
