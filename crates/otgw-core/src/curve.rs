//! ---
//! otgw_section: "01-core-functionality"
//! otgw_subsection: "module"
//! otgw_type: "source"
//! otgw_scope: "code"
//! otgw_description: "Outdoor-compensated CH water setpoint."
//! otgw_version: "v0.0.0-prealpha"
//! otgw_owner: "tbd"
//! ---
use otgw_common::HeatingCurveConfig;

/// Water setpoint decision for one intercepted TSet write.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CurveOutput {
    pub value: f32,
    /// `false` inside the hysteresis band: forward the thermostat frame as is.
    pub substitute: bool,
}

#[derive(Debug, Clone)]
pub struct HeatingCurve {
    config: HeatingCurveConfig,
}

impl Default for HeatingCurve {
    fn default() -> Self {
        Self::new(HeatingCurveConfig::default())
    }
}

impl HeatingCurve {
    pub fn new(config: HeatingCurveConfig) -> Self {
        Self { config }
    }

    /// Map room and outdoor temperatures to a CH water setpoint.
    ///
    /// NaN room temperature lands in the hysteresis branch since both
    /// comparisons are false.
    pub fn water_setpoint(
        &self,
        room_current: f32,
        room_target: f32,
        outdoor: f32,
        fallback: f32,
    ) -> CurveOutput {
        let c = &self.config;
        if room_current > room_target + c.upper_hysteresis {
            return CurveOutput {
                value: c.off_water_temperature,
                substitute: true,
            };
        }
        if room_current < room_target - c.lower_hysteresis {
            let value = if outdoor.is_nan() {
                fallback
            } else {
                (c.base_temperature + c.slope * (c.design_room_temperature - outdoor))
                    .clamp(c.min_water_temperature, c.max_water_temperature)
            };
            return CurveOutput {
                value,
                substitute: true,
            };
        }
        CurveOutput {
            value: fallback,
            substitute: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4
    }

    #[test]
    fn warm_room_forces_burner_off() {
        let out = HeatingCurve::default().water_setpoint(21.0, 20.5, 5.0, 45.0);
        assert_eq!(
            out,
            CurveOutput {
                value: 20.0,
                substitute: true
            }
        );
    }

    #[test]
    fn cold_room_follows_the_curve() {
        let out = HeatingCurve::default().water_setpoint(19.0, 20.0, -10.0, 45.0);
        assert!(out.substitute);
        assert!(approx(out.value, 67.0), "{}", out.value);
    }

    #[test]
    fn curve_output_is_clamped() {
        let curve = HeatingCurve::default();
        assert_eq!(curve.water_setpoint(18.0, 20.0, -40.0, 45.0).value, 75.0);
        assert_eq!(curve.water_setpoint(18.0, 20.0, 25.0, 45.0).value, 25.0);
    }

    #[test]
    fn cold_room_without_outdoor_reading_substitutes_fallback() {
        let out = HeatingCurve::default().water_setpoint(19.0, 20.0, f32::NAN, 45.0);
        assert_eq!(
            out,
            CurveOutput {
                value: 45.0,
                substitute: true
            }
        );
    }

    #[test]
    fn hysteresis_band_forwards_unmodified() {
        let out = HeatingCurve::default().water_setpoint(20.2, 20.3, 0.0, 45.0);
        assert!(!out.substitute);
        assert_eq!(out.value, 45.0);
    }

    #[test]
    fn unknown_room_temperature_forwards_unmodified() {
        let out = HeatingCurve::default().water_setpoint(f32::NAN, 20.0, 0.0, 45.0);
        assert!(!out.substitute);
    }
}
