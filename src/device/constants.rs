use uuid::Uuid;

/**
 * Default debounce window (milliseconds) between two angle writes.
 */
pub const DEBOUNCE_DELAY: u64 = 500;

/**
 * Forwarded instead of a value when a notification could not be delivered or decoded.
 */
pub const NOTIFY_ERROR_SENTINEL: &str = "#FFFFFF";

/**
 * Name fragments of the peripherals this application knows how to talk to.
 */
pub const DEFAULT_ALLOWED_NAMES: [&str; 2] = ["Arduino", "Friyia"];

/**
 * Capacity of the channels that carry scan results and notifications.
 */
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/**
 * "color" firmware: the peripheral reports a hex color string.
 */
pub const COLOR_SERVICE: Uuid = Uuid::from_u128(0x96e4d99a_066f_444c_b67c_112345e3b1a2);
pub const COLOR_CHARACTERISTIC_NOTIFY: Uuid = Uuid::from_u128(0x7c0209c0_93f0_437a_828a_a58379b230c4);
pub const COLOR_CHARACTERISTIC_WRITE: Uuid = Uuid::from_u128(0x1b3dcc2d_cc56_4b47_b6c2_13745858c7df);
pub const COLOR_CHARACTERISTIC_READ: Uuid = Uuid::from_u128(0x3d84e60b_90d0_40d4_993a_1b83424cb868);

/**
 * "angle" firmware: the peripheral echoes the current angle in degrees.
 * These follow the ArduinoBLE sketch layout; override them in the config file for other boards.
 */
pub const ANGLE_SERVICE: Uuid = Uuid::from_u128(0x19b10000_e8f2_537e_4f6c_d104768a1214);
pub const ANGLE_CHARACTERISTIC_NOTIFY: Uuid = Uuid::from_u128(0x19b10001_e8f2_537e_4f6c_d104768a1214);
pub const ANGLE_CHARACTERISTIC_WRITE: Uuid = Uuid::from_u128(0x19b10002_e8f2_537e_4f6c_d104768a1214);
pub const ANGLE_CHARACTERISTIC_READ: Uuid = Uuid::from_u128(0x19b10003_e8f2_537e_4f6c_d104768a1214);
