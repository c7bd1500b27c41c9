//! Typed header names for AMI frames.

define_wire_enum! {
    /// Header names that the built-in plugins read from AMI frames.
    ///
    /// Asterisk is inconsistent about casing across versions (`ActionID` vs `ActionId`,
    /// `Uniqueid` vs `UniqueID`), so frame lookups are case-insensitive. Use with
    /// [`AmiFrame::header()`](crate::AmiFrame::header).
    pub enum FrameHeader: ParseFrameHeaderError("frame header") {
        Action => "Action",
        ActionId => "ActionID",
        Response => "Response",
        Message => "Message",
        Event => "Event",
        EventList => "EventList",
        Channel => "Channel",
        Newname => "Newname",
        DestChannel => "DestChannel",
        ChannelState => "ChannelState",
        ChannelStateDesc => "ChannelStateDesc",
        CallerIdNum => "CallerIDNum",
        CallerIdName => "CallerIDName",
        ConnectedLineNum => "ConnectedLineNum",
        ConnectedLineName => "ConnectedLineName",
        DestCallerIdNum => "DestCallerIDNum",
        DestExten => "DestExten",
        Exten => "Exten",
        Context => "Context",
        Uniqueid => "Uniqueid",
        Linkedid => "Linkedid",
        DestUniqueid => "DestUniqueid",
        BridgeId => "BridgeId",
        Status => "Status",
        StatusText => "StatusText",
        Peer => "Peer",
        PeerStatus => "PeerStatus",
        Address => "Address",
        Aor => "AOR",
        ContactStatus => "ContactStatus",
        Uri => "URI",
        Device => "Device",
        State => "State",
        Queue => "Queue",
        MemberName => "MemberName",
        Interface => "Interface",
        StateInterface => "StateInterface",
        Membership => "Membership",
        Penalty => "Penalty",
        CallsTaken => "CallsTaken",
        LastCall => "LastCall",
        Paused => "Paused",
        PausedReason => "PausedReason",
        Reason => "Reason",
        Position => "Position",
        HoldTime => "HoldTime",
        Strategy => "Strategy",
        Completed => "Completed",
        Abandoned => "Abandoned",
        Calls => "Calls",
        Wait => "Wait",
        ParkingSpace => "ParkingSpace",
        ParkingLot => "ParkingLot",
        ParkingTimeout => "ParkingTimeout",
        ParkeeChannel => "ParkeeChannel",
        ParkeeCallerIdNum => "ParkeeCallerIDNum",
        ParkeeCallerIdName => "ParkeeCallerIDName",
        ParkeeUniqueid => "ParkeeUniqueid",
        ParkerDialString => "ParkerDialString",
        StartSpace => "StartSpace",
        StopSpace => "StopSpace",
        Timeout => "Timeout",
        Name => "Name",
        Meetme => "Meetme",
        Usernum => "Usernum",
        User => "User",
        Muted => "Muted",
        Mailbox => "Mailbox",
        Waiting => "Waiting",
        New => "New",
        Old => "Old",
        Family => "Family",
        Key => "Key",
        Val => "Val",
        Ping => "Ping",
        ObjectName => "ObjectName",
        ViaAddress => "ViaAddress",
        UserAgent => "UserAgent",
        Endpoint => "Endpoint",
        EndpointName => "EndpointName",
        Source => "Source",
        Destination => "Destination",
        DestinationContext => "DestinationContext",
        DestinationChannel => "DestinationChannel",
        StartTime => "StartTime",
        AnswerTime => "AnswerTime",
        EndTime => "EndTime",
        Duration => "Duration",
        BillableSeconds => "BillableSeconds",
        Disposition => "Disposition",
        UniqueId => "UniqueID",
        Cause => "Cause",
        CauseTxt => "Cause-txt",
        Application => "Application",
        Direction => "Direction",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_uses_canonical_casing() {
        assert_eq!(FrameHeader::ActionId.to_string(), "ActionID");
        assert_eq!(FrameHeader::CallerIdNum.to_string(), "CallerIDNum");
        assert_eq!(FrameHeader::CauseTxt.to_string(), "Cause-txt");
    }

    #[test]
    fn from_str_case_insensitive() {
        assert_eq!("actionid".parse::<FrameHeader>(), Ok(FrameHeader::ActionId));
        assert_eq!("ACTIONID".parse::<FrameHeader>(), Ok(FrameHeader::ActionId));
        assert_eq!("aor".parse::<FrameHeader>(), Ok(FrameHeader::Aor));
    }

    #[test]
    fn from_str_unknown() {
        let err = "X-Not-A-Header".parse::<FrameHeader>();
        assert_eq!(
            err.unwrap_err()
                .to_string(),
            "unknown frame header: X-Not-A-Header"
        );
    }

    #[test]
    fn uniqueid_spellings_collide_case_insensitively() {
        // Both spellings exist on the wire; the first declared variant wins on parse.
        assert_eq!("UNIQUEID".parse::<FrameHeader>(), Ok(FrameHeader::Uniqueid));
    }

    #[test]
    fn all_variants_round_trip() {
        for v in FrameHeader::ALL {
            if *v == FrameHeader::UniqueId {
                continue;
            }
            let parsed: FrameHeader = v
                .as_str()
                .parse()
                .unwrap();
            assert_eq!(parsed, *v, "round-trip failed for {}", v);
        }
    }
}
