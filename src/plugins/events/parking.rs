//! Parking slots

use crate::error::{AmiError, AmiResult};
use crate::frame::AmiFrame;
use crate::headers::FrameHeader;
use crate::plugins::commands::parked_call_info;
use crate::plugins::{EventContext, EventPlugin};
use crate::state::ParkedCall;

/// `ParkedCall`: a slot got occupied
pub struct ParkedCallPlugin;

impl EventPlugin for ParkedCallPlugin {
    fn names(&self) -> &[&'static str] {
        &["parkedcall"]
    }

    fn data(&mut self, frame: &AmiFrame, ctx: &mut EventContext<'_>) -> AmiResult<()> {
        let info = parked_call_info(frame);
        if info
            .parking_space
            .is_empty()
        {
            return Err(AmiError::malformed("ParkedCall without ParkingSpace"));
        }
        ctx.state
            .park(
                &info.parking_space,
                &info.parking_lot,
                ParkedCall {
                    channel: info.channel,
                    uniqueid: info.uniqueid,
                    caller_num: info.caller_num,
                    caller_name: info.caller_name,
                    parked_by: info.parked_by,
                    timeout: info.timeout,
                    parked_at: ctx.wall,
                },
            );
        Ok(())
    }
}

/// `ParkedCallGiveUp`, `ParkedCallTimeOut`, `UnParkedCall`: the slot is free again
pub struct UnparkPlugin;

impl EventPlugin for UnparkPlugin {
    fn names(&self) -> &[&'static str] {
        &["parkedcallgiveup", "parkedcalltimeout", "unparkedcall"]
    }

    fn data(&mut self, frame: &AmiFrame, ctx: &mut EventContext<'_>) -> AmiResult<()> {
        ctx.state
            .unpark(frame.get_or_empty(FrameHeader::ParkingSpace));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::events::ProxyEvent;
    use crate::frame::AmiFrame;
    use crate::plugins::events::testing::Harness;

    #[test]
    fn test_park_and_timeout() {
        let mut h = Harness::new();
        let events = h.apply(
            AmiFrame::event("ParkedCall")
                .with("ParkingSpace", "71")
                .with("ParkingLot", "default")
                .with("ParkeeChannel", "PJSIP/2001-00000004")
                .with("ParkeeCallerIDNum", "3351234567")
                .with("ParkerDialString", "PJSIP/201")
                .with("ParkingTimeout", "45"),
        );
        assert!(matches!(
            events.as_slice(),
            [ProxyEvent::ParkingChanged(p)]
                if p.parked.as_ref().is_some_and(|c| c.caller_num == "3351234567")
        ));

        h.apply(AmiFrame::event("ParkedCallTimeOut").with("ParkingSpace", "71"));
        assert!(h.state.parkings()["71"].parked.is_none());
    }
}
